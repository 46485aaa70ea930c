use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::commands;
use crate::constants::{
    DEFAULT_MAINTENANCE_WINDOW, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_PORT, DEFAULT_SEGMENT,
    LIVE_CACHE_TTL_MS, STREAM_INTERVAL_SECS, UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS,
};
use crate::error::{AppError, Result};
use crate::models::{PollConfig, TrackedContract};
use crate::server::ServerConfig;
use crate::services::{HttpFetcher, MaintenanceWindow};
use crate::utils;

#[derive(Parser)]
#[command(name = "optionpulse")]
#[command(about = "Option-chain snapshot poller and analytics API", long_about = None)]
pub struct Cli {
    /// SQLite database file (defaults to $OPTIONPULSE_DB or optionpulse.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server, polling any tracked contracts in the background
    Serve {
        #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Delay between two pushes of a live stream, in seconds
        #[arg(long, default_value_t = STREAM_INTERVAL_SECS)]
        stream_interval: u64,

        /// How long a fetched chain is reused by lookups, in milliseconds
        #[arg(long, default_value_t = LIVE_CACHE_TTL_MS)]
        cache_ttl_ms: u64,

        /// Seconds added to an upstream expiry id to get Unix seconds
        #[arg(
            long,
            env = "EXPIRY_EPOCH_OFFSET",
            default_value_t = UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS,
            allow_hyphen_values = true
        )]
        expiry_epoch_offset: i64,

        #[command(flatten)]
        poll: PollArgs,

        #[command(flatten)]
        upstream: UpstreamArgs,
    },
    /// Poll tracked contracts in the foreground until interrupted
    Poll {
        #[command(flatten)]
        poll: PollArgs,

        #[command(flatten)]
        upstream: UpstreamArgs,
    },
    /// Dump the stored samples of one expiry and trading day as JSON
    History {
        /// Expiry id
        #[arg(short, long)]
        expiry: i64,

        /// Trading day as YYYY-MM-DD or a Unix timestamp
        #[arg(short, long)]
        date: String,

        /// Only this strike (requires --side)
        #[arg(long, requires = "side")]
        strike: Option<String>,

        /// CE or PE
        #[arg(long)]
        side: Option<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show stored expiries, days and sample counts
    Status,
    /// Rebuild date lists from stored samples
    Repair,
}

/// Options shared by every command that polls
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Contract to poll as symbol:segment:expiry (repeatable or comma separated)
    #[arg(short, long = "track", env = "TRACK", value_delimiter = ',')]
    pub track: Vec<String>,

    /// Seconds between two fetches
    #[arg(long, env = "POLL_INTERVAL", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub interval: u64,

    /// Upper bound of the error backoff, in seconds
    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_SECS)]
    pub max_backoff: u64,

    /// Daily pause window HH:MM-HH:MM in the market timezone, or "off"
    #[arg(long, env = "MAINTENANCE_WINDOW", default_value = DEFAULT_MAINTENANCE_WINDOW)]
    pub window: String,

    /// Market timezone (defaults to $MARKET_TZ or Asia/Kolkata)
    #[arg(long)]
    pub timezone: Option<String>,
}

impl PollArgs {
    pub fn maintenance_window(&self) -> Result<MaintenanceWindow> {
        if self.window.eq_ignore_ascii_case("off") {
            return Ok(MaintenanceWindow::disabled());
        }
        let timezone = self.timezone.clone().unwrap_or_else(utils::get_market_timezone);
        MaintenanceWindow::parse(&self.window, &timezone)
    }

    pub fn configs(&self) -> Result<Vec<PollConfig>> {
        if self.interval == 0 {
            return Err(AppError::Config("--interval must be at least 1 second".to_string()));
        }
        let window = self.maintenance_window()?;

        let mut contracts = Vec::new();
        for entry in &self.track {
            contracts.extend(TrackedContract::parse_list(entry).map_err(AppError::Config)?);
        }

        Ok(contracts
            .into_iter()
            .map(|contract| {
                PollConfig::new(contract)
                    .with_interval(Duration::from_secs(self.interval))
                    .with_max_backoff(Duration::from_secs(self.max_backoff))
                    .with_maintenance_window(window)
            })
            .collect())
    }
}

/// Upstream endpoints
#[derive(Args, Debug, Clone)]
pub struct UpstreamArgs {
    /// Option-chain endpoint (defaults to $UPSTREAM_URL)
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Expiry-list endpoint (defaults to $EXPIRY_LIST_URL)
    #[arg(long)]
    pub expiry_list_url: Option<String>,

    /// Segment used when a request omits one
    #[arg(long, env = "DEFAULT_SEGMENT", default_value_t = DEFAULT_SEGMENT)]
    pub segment: u32,
}

impl UpstreamArgs {
    pub fn fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(
            self.upstream_url.clone().unwrap_or_else(utils::get_upstream_url),
            self.expiry_list_url.clone().unwrap_or_else(utils::get_expiry_list_url),
        )
    }
}

pub async fn run() {
    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(utils::get_database_path);

    match cli.command {
        Commands::Serve {
            port,
            stream_interval,
            cache_ttl_ms,
            expiry_epoch_offset,
            poll,
            upstream,
        } => {
            let config = poll.configs().map(|pollers| ServerConfig {
                port,
                default_segment: upstream.segment,
                stream_interval: Duration::from_secs(stream_interval.max(1)),
                cache_ttl: Duration::from_millis(cache_ttl_ms),
                expiry_epoch_offset,
                pollers,
            });
            match (config, poll.maintenance_window()) {
                (Ok(config), Ok(window)) => commands::serve::run(db_path, config, window, upstream).await,
                (Err(e), _) | (_, Err(e)) => exit_with(e),
            }
        }
        Commands::Poll { poll, upstream } => match poll.configs() {
            Ok(configs) => commands::poll::run(db_path, configs, upstream).await,
            Err(e) => exit_with(e),
        },
        Commands::History {
            expiry,
            date,
            strike,
            side,
            output,
        } => {
            commands::history::run(db_path, expiry, date, strike, side, output).await;
        }
        Commands::Status => {
            commands::status::run(db_path).await;
        }
        Commands::Repair => {
            commands::repair::run(db_path).await;
        }
    }
}

fn exit_with(e: AppError) {
    eprintln!("❌ Configuration error: {}", e);
    std::process::exit(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_args(track: &[&str], window: &str) -> PollArgs {
        PollArgs {
            track: track.iter().map(|s| s.to_string()).collect(),
            interval: 5,
            max_backoff: 30,
            window: window.to_string(),
            timezone: Some("Asia/Kolkata".to_string()),
        }
    }

    #[test]
    fn test_poll_configs() {
        let configs = poll_args(&["13:0:1416076200", "25:0:1416076200,13:0:1416680999"], "09:07-09:16")
            .configs()
            .unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].interval, Duration::from_secs(5));
        assert_eq!(configs[2].contract, TrackedContract::new(13, 0, 1416680999));
        assert!(!configs[0].maintenance_window.is_empty());
    }

    #[test]
    fn test_window_off_and_bad_input() {
        let args = poll_args(&[], "off");
        assert!(args.maintenance_window().unwrap().is_empty());
        assert!(args.configs().unwrap().is_empty());

        assert!(poll_args(&["13:0"], "off").configs().is_err());
        assert!(poll_args(&[], "9-10").configs().is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "optionpulse",
            "--db",
            "/tmp/x.db",
            "history",
            "--expiry",
            "1416076200",
            "--date",
            "2024-11-08",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(cli.command, Commands::History { expiry: 1416076200, .. }));
    }

    #[test]
    fn test_serve_expiry_epoch_offset() {
        let cli = Cli::try_parse_from(["optionpulse", "serve", "--expiry-epoch-offset", "-19800"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { expiry_epoch_offset: -19800, .. }));

        let cli = Cli::try_parse_from(["optionpulse", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { expiry_epoch_offset, .. } => {
                if std::env::var_os("EXPIRY_EPOCH_OFFSET").is_none() {
                    assert_eq!(expiry_epoch_offset, UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS);
                }
            }
            _ => panic!("expected serve"),
        }
    }
}

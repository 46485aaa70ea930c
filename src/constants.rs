//! Defaults for polling, streaming, the upstream source and the pricing model.
//!
//! Everything here can be overridden from the CLI or the environment; these are
//! the values used when nothing is configured.

/// Fixed cadence between two snapshot fetches
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Upper bound for the error backoff of a polling loop
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 60;

/// Backoff doubles per consecutive failure up to this exponent (interval * 2^3)
pub const MAX_BACKOFF_EXPONENT: u32 = 3;

/// How often a paused loop re-checks the maintenance window
pub const PAUSE_CHECK_INTERVAL_SECS: u64 = 10;

/// Cadence of the per-client push stream
pub const STREAM_INTERVAL_SECS: u64 = 5;

/// How long a fetched live chain is reused by point lookups and streams
pub const LIVE_CACHE_TTL_MS: u64 = 2_000;

/// HTTP port of the API server
pub const DEFAULT_PORT: u16 = 10001;

/// Upstream exchange segment used when a request does not name one
pub const DEFAULT_SEGMENT: u32 = 0;

/// SQLite file holding snapshot records and blobs
pub const DEFAULT_DATABASE_PATH: &str = "optionpulse.db";

/// Upstream option-chain endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "https://scanx.dhan.co/scanx/optchain";

/// Upstream expiry-list endpoint
pub const DEFAULT_EXPIRY_LIST_URL: &str = "https://scanx.dhan.co/scanx/futoptsum";

/// Upstream request timeout
pub const UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// The upstream counts expiry seconds from 1980-01-01T00:00:00Z; add this to get Unix seconds
pub const UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS: i64 = 315_532_800;

/// Timezone the maintenance window is expressed in
pub const DEFAULT_MARKET_TIMEZONE: &str = "Asia/Kolkata";

/// Daily upstream rollover window during which polling pauses, half-open [start, end)
pub const DEFAULT_MAINTENANCE_WINDOW: &str = "09:07-09:16";

/// Calendar days per year used to annualize time to expiry
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Implied volatilities arrive in percent
pub const IV_PERCENT_SCALE: f64 = 100.0;

/// Newton iteration limits for the reversal solver
pub const REVERSAL_MAX_ITERS: u32 = 50;
pub const REVERSAL_TOLERANCE: f64 = 1e-6;

/// Smallest call-put slope the reversal solver accepts before declaring the strike degenerate
pub const MIN_REVERSAL_SLOPE: f64 = 1e-9;

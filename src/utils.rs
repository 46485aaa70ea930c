use crate::constants::{
    DEFAULT_DATABASE_PATH, DEFAULT_EXPIRY_LIST_URL, DEFAULT_MARKET_TIMEZONE, DEFAULT_UPSTREAM_URL,
};
use std::path::PathBuf;

/// Get the SQLite database path from environment variable or use default
pub fn get_database_path() -> PathBuf {
    std::env::var("OPTIONPULSE_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH))
}

/// Get the upstream option-chain URL from environment variable or use default
pub fn get_upstream_url() -> String {
    std::env::var("UPSTREAM_URL").unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string())
}

/// Get the upstream expiry-list URL from environment variable or use default
pub fn get_expiry_list_url() -> String {
    std::env::var("EXPIRY_LIST_URL").unwrap_or_else(|_| DEFAULT_EXPIRY_LIST_URL.to_string())
}

/// Get the market timezone name from environment variable or use default
pub fn get_market_timezone() -> String {
    std::env::var("MARKET_TZ").unwrap_or_else(|_| DEFAULT_MARKET_TIMEZONE.to_string())
}

/// Worker threads for the polling runtime (1-2 cores→1, 3-4 cores→2, 5+ cores→4)
pub fn get_worker_threads() -> usize {
    match num_cpus::get() {
        0..=2 => 1,
        3..=4 => 2,
        _ => 4,
    }
}

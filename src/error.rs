use thiserror::Error as ThisError;

use crate::models::TradingDay;

#[derive(ThisError, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {message}")]
    NotFound {
        message: String,
        /// Days that do exist for the requested expiry (empty when the expiry itself is unknown)
        available_days: Vec<TradingDay>,
    },

    #[error("Blob missing: {0}")]
    BlobMissing(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound {
            message: message.into(),
            available_days: Vec::new(),
        }
    }

    /// Whether the failure came from the upstream data source (skip-and-retry class)
    pub fn is_upstream(&self) -> bool {
        matches!(self, AppError::UpstreamUnavailable(_) | AppError::MalformedPayload(_))
    }

    /// HTTP status code used when the error reaches an API caller
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::NotFound { .. } => 404,
            AppError::UpstreamUnavailable(_) | AppError::MalformedPayload(_) => 502,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(AppError::not_found("x").status_code(), 404);
        assert_eq!(AppError::UpstreamUnavailable("x".into()).status_code(), 502);
        assert_eq!(AppError::MalformedPayload("x".into()).status_code(), 502);
        assert_eq!(AppError::Database("x".into()).status_code(), 500);
    }

    #[test]
    fn test_upstream_classification() {
        assert!(AppError::MalformedPayload("missing data.oc".into()).is_upstream());
        assert!(!AppError::not_found("strike").is_upstream());
    }
}

use thiserror::Error;

use crate::catalog;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
}

/// Process configuration, read once at startup. A missing required value is
/// a labeled error here rather than a cryptic failure somewhere downstream.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination table-store base URL.
    pub store_url: String,
    /// Destination credential (sent as both static credential headers).
    pub store_key: String,
    /// Account code presented to the source service at authentication.
    pub account_code: String,
    /// Source SOAP endpoint; overridable for test rigs.
    pub ws_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store_url: require("STORE_URL", "FLEETSYNC_STORE_URL")?,
            store_key: require("STORE_KEY", "FLEETSYNC_STORE_KEY")?,
            account_code: require("ACCOUNT_CODE", "FLEETSYNC_ACCOUNT_CODE")?,
            ws_url: std::env::var("WS_URL").unwrap_or_else(|_| catalog::WS_URL.to_string()),
        })
    }
}

fn require(name: &'static str, fallback: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .or_else(|_| std::env::var(fallback))
        .map_err(|_| ConfigError::Missing(name))
}

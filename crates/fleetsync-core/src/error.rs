use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication failed after retries: {0}")]
    Auth(String),

    #[error("remote call failed: {0}")]
    Soap(#[from] fleetsync_soap::SoapError),

    #[error("destination store failed: {0}")]
    Store(#[from] fleetsync_store::StoreError),

    #[error("reference table {0} is empty; run step 0 first")]
    EmptyReference(&'static str),
}

pub type Result<T> = std::result::Result<T, SyncError>;

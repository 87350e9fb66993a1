use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoapError {
    #[error("transport failure calling {method}: {message}")]
    Transport { method: String, message: String },

    #[error("{method} returned HTTP {status}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },

    #[error("{method} returned a fault payload")]
    Fault { method: String },

    #[error("authentication response did not contain a session token")]
    MissingToken,
}

impl SoapError {
    /// True for failures where re-authenticating and retrying once can help:
    /// the exchange itself failed or the service answered with a fault.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SoapError::Transport { .. } | SoapError::Status { .. } | SoapError::Fault { .. }
        )
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}

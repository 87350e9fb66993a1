use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::envelope::{build_envelope, soap_action};
use crate::errors::{truncate_body, SoapError};
use crate::extract::extract_token;
use crate::transport::{SoapRequest, SoapTransport};

/// Authentication call: exchanges the account code for a session token.
pub const AUTH_METHOD: &str = "IdentificationTechnicien";
pub const AUTH_CODE_PARAM: &str = "sSteCodeWeb";

/// Sentinel substring marking a logical failure inside a transport-level
/// success.
const FAULT_MARKER: &str = "Fault";

/// Request/response client for the legacy service. Owns no session state:
/// the token is passed per call, and retry policy lives with the caller.
#[derive(Clone)]
pub struct SoapClient {
    transport: Arc<dyn SoapTransport>,
    url: String,
}

impl SoapClient {
    pub fn new(transport: Arc<dyn SoapTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }

    /// Issues the well-known authentication call and extracts the session
    /// token. No retry here — bounded retry with backoff is the
    /// orchestrator's job.
    pub async fn authenticate(
        &self,
        account_code: &str,
        timeout: Duration,
    ) -> Result<String, SoapError> {
        let params = [(AUTH_CODE_PARAM, account_code.to_string())];
        let body = self.call(AUTH_METHOD, &params, None, timeout).await?;
        extract_token(&body).ok_or(SoapError::MissingToken)
    }

    /// One method invocation. Returns the raw payload only when the HTTP
    /// status is 2xx and the body carries no fault marker.
    pub async fn call(
        &self,
        method: &str,
        params: &[(&str, String)],
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<String, SoapError> {
        let request = SoapRequest {
            url: self.url.clone(),
            action: soap_action(method),
            body: build_envelope(method, params, token),
            timeout,
        };

        debug!(method, timeout_secs = timeout.as_secs(), "soap call");

        let response = self
            .transport
            .exchange(request)
            .await
            .map_err(|message| SoapError::Transport {
                method: method.to_string(),
                message,
            })?;

        if !(200..300).contains(&response.status) {
            return Err(SoapError::Status {
                method: method.to_string(),
                status: response.status,
                body: truncate_body(&response.body),
            });
        }
        if response.body.contains(FAULT_MARKER) {
            return Err(SoapError::Fault {
                method: method.to_string(),
            });
        }

        Ok(response.body)
    }
}

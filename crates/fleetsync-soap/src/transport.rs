use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// One request/response exchange with the remote service. The transport does
/// not interpret the payload: non-2xx statuses come back as data, and only
/// connection-level failures (DNS, TLS, timeout) are errors.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    pub url: String,
    pub action: String,
    pub body: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn exchange(&self, request: SoapRequest) -> Result<SoapResponse, String>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("ReqwestTransport").finish()
    }
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("fleetsync/soap")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| format!("failed to initialize SOAP HTTP client: {err}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SoapTransport for ReqwestTransport {
    async fn exchange(&self, request: SoapRequest) -> Result<SoapResponse, String> {
        let response = self
            .client
            .post(&request.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", &request.action)
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| format!("failed to read response body: {err}"))?;

        Ok(SoapResponse { status, body })
    }
}

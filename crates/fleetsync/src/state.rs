use std::sync::Arc;

use tokio::sync::Mutex;

use fleetsync_core::{Config, SyncPipeline};
use fleetsync_soap::{ReqwestTransport, SoapClient};
use fleetsync_store::{RestTableStore, TableStore};

/// Shared between requests: the pipeline (with its in-process session-token
/// cache) behind a mutex — one step per invocation, no internal concurrency
/// — and the store handle for the read-only reporters.
pub struct AppState {
    pub pipeline: Arc<Mutex<SyncPipeline>>,
    pub store: Arc<dyn TableStore>,
}

impl AppState {
    pub fn new(pipeline: SyncPipeline) -> Arc<Self> {
        let store = pipeline.store();
        Arc::new(Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            store,
        })
    }
}

/// Wires the production transports from configuration.
pub fn build_pipeline(config: &Config) -> anyhow::Result<SyncPipeline> {
    let transport = Arc::new(ReqwestTransport::new().map_err(anyhow::Error::msg)?);
    let client = SoapClient::new(transport, config.ws_url.clone());
    let store =
        Arc::new(RestTableStore::new(&config.store_url, &config.store_key).map_err(anyhow::Error::msg)?);
    Ok(SyncPipeline::new(
        client,
        store,
        config.account_code.clone(),
    ))
}

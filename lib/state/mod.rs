use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::transport::KinesisTransport;

pub struct AppState {
    pub transport: Arc<KinesisTransport>,
    pub registry: RwLock<Registry>,
    pub shutdown_token: CancellationToken,
}

impl AppState {
    pub fn new(
        transport: Arc<KinesisTransport>,
        registry: Registry,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            registry: RwLock::new(registry),
            shutdown_token,
        }
    }
}

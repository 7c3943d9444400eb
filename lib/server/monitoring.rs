use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct IngestMetrics {
    pub records_forwarded: Counter,
    pub record_failures: Counter,
    pub checkpoint_failures: Counter,
    pub throttle_stops: Counter,
}

impl IngestMetrics {
    fn init() -> Self {
        Self {
            records_forwarded: Counter::default(),
            record_failures: Counter::default(),
            checkpoint_failures: Counter::default(),
            throttle_stops: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::init();

        registry.register(
            "records_forwarded",
            "Total number of records decompressed and forwarded downstream",
            metrics.records_forwarded.clone(),
        );
        registry.register(
            "record_failures",
            "Total number of records skipped due to decompression or forwarding failures",
            metrics.record_failures.clone(),
        );
        registry.register(
            "checkpoint_failures",
            "Total number of checkpoint commits abandoned",
            metrics.checkpoint_failures.clone(),
        );
        registry.register(
            "throttle_stops",
            "Total number of consumer shutdowns forced by throttling",
            metrics.throttle_stops.clone(),
        );

        metrics
    }
}

pub static INGEST_METRICS: OnceCell<IngestMetrics> = OnceCell::const_new();

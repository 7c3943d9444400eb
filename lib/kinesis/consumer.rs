use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info};

use crate::config::{KinesisInputConfig, Region};
use crate::throttle::ThrottleGate;
use crate::transport::state::{TransportState, TransportStateCell};

use super::coordinator::{
    CoordinatorConfig, CoordinatorFactory, ShardProcessor, ShardProcessorFactory, ShutdownHandle,
};
use super::processor::RecordBatchProcessor;
use super::sink::RecordSink;

/// Resolved settings for one consumer run.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream_name: String,
    pub region: Region,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub assume_role_arn: Option<String>,
    pub proxy_url: Option<String>,
    pub record_batch_size: Option<usize>,
    pub max_throttle_wait: Duration,
    pub checkpoint_interval: Duration,
    pub worker_id: String,
}

impl ConsumerConfig {
    pub fn from_input(config: &KinesisInputConfig) -> Self {
        Self {
            stream_name: config.stream_name.clone(),
            region: config.region,
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            assume_role_arn: config.assume_role_arn.clone(),
            proxy_url: config.proxy_url.clone(),
            record_batch_size: config.record_batch_size,
            max_throttle_wait: config.max_throttle_wait,
            checkpoint_interval: config.checkpoint_interval,
            worker_id: config
                .worker_id
                .clone()
                .unwrap_or_else(|| format!("ingest-node-{}", process::id())),
        }
    }
}

/// Owns one blocking consume run against the coordination service.
///
/// Shared (via `Arc`) between its dedicated reader thread, which calls
/// [`KinesisConsumer::run`], and the transport, which calls
/// [`KinesisConsumer::stop`] and resubmits the consumer after a
/// throttle-forced shutdown.
pub struct KinesisConsumer {
    config: ConsumerConfig,
    factory: Box<dyn CoordinatorFactory>,
    sink: Arc<dyn RecordSink>,
    gate: Arc<ThrottleGate>,
    state: Arc<TransportStateCell>,
    stopped_due_to_throttling: Arc<AtomicBool>,
    shutdown: Mutex<Option<ShutdownHandle>>,
}

impl KinesisConsumer {
    pub fn new(
        config: ConsumerConfig,
        factory: Box<dyn CoordinatorFactory>,
        sink: Arc<dyn RecordSink>,
        gate: Arc<ThrottleGate>,
        state: Arc<TransportStateCell>,
        stopped_due_to_throttling: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            factory,
            sink,
            gate,
            state,
            stopped_due_to_throttling,
            shutdown: Mutex::new(None),
        }
    }

    fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            // The lease/checkpoint state is keyed by this name; two streams
            // sharing one application name would corrupt each other's state.
            application_name: format!("kinesis-ingest-{}", self.config.stream_name),
            worker_id: self.config.worker_id.clone(),
            stream_name: self.config.stream_name.clone(),
            region: self.config.region,
            access_key: self.config.access_key.clone(),
            secret_key: self.config.secret_key.clone(),
            assume_role_arn: self.config.assume_role_arn.clone(),
            proxy_url: self.config.proxy_url.clone(),
            max_records: self.config.record_batch_size,
        }
    }

    /// Runs the consume loop on the calling thread until shutdown.
    ///
    /// The lifecycle always ends at STOPPED, whichever path the run takes;
    /// RUNNING is set by the per-shard initialize callback.
    pub fn run(&self) {
        self.state.set(TransportState::Starting);
        info!(
            "Starting Kinesis consumer for stream <{}> in region <{}>",
            self.config.stream_name, self.config.region
        );
        debug!(
            "Max throttle wait [{:?}], record batch size hint [{:?}]",
            self.config.max_throttle_wait, self.config.record_batch_size
        );

        let mut coordinator = match self.factory.build(&self.coordinator_config()) {
            Ok(coordinator) => coordinator,
            Err(err) => {
                error!(
                    "Couldn't build shard coordinator for stream <{}>: {}",
                    self.config.stream_name, err
                );
                self.state.set(TransportState::Stopped);
                return;
            }
        };

        let handle = coordinator.shutdown_handle();
        *self.shutdown.lock().expect("shutdown slot poisoned") = Some(handle.clone());

        let processors = BatchProcessorFactory {
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            gate: Arc::clone(&self.gate),
            state: Arc::clone(&self.state),
            stopped_due_to_throttling: Arc::clone(&self.stopped_due_to_throttling),
            shutdown: handle,
        };

        if let Err(err) = coordinator.run(&processors) {
            error!(
                "Kinesis consumer for stream <{}> aborted: {}",
                self.config.stream_name, err
            );
        }

        *self.shutdown.lock().expect("shutdown slot poisoned") = None;
        self.state.set(TransportState::Stopped);
        info!(
            "Kinesis consumer for stream <{}> stopped",
            self.config.stream_name
        );
    }

    /// Requests a graceful shutdown of the active run. No-op when no run is
    /// active; safe to call repeatedly.
    pub fn stop(&self) {
        let slot = self.shutdown.lock().expect("shutdown slot poisoned");
        if let Some(handle) = slot.as_ref() {
            info!(
                "Stopping Kinesis consumer for stream <{}>",
                self.config.stream_name
            );
            self.state.set(TransportState::Stopping);
            handle.request_shutdown();
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }
}

/// Stamps out one [`RecordBatchProcessor`] per leased shard, all sharing the
/// transport's gate, lifecycle cell, throttle-stop flag, and sink.
struct BatchProcessorFactory {
    config: ConsumerConfig,
    sink: Arc<dyn RecordSink>,
    gate: Arc<ThrottleGate>,
    state: Arc<TransportStateCell>,
    stopped_due_to_throttling: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
}

impl ShardProcessorFactory for BatchProcessorFactory {
    fn create(&self) -> Box<dyn ShardProcessor> {
        Box::new(RecordBatchProcessor::new(
            self.config.stream_name.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.gate),
            Arc::clone(&self.state),
            Arc::clone(&self.stopped_due_to_throttling),
            self.shutdown.clone(),
            self.config.max_throttle_wait,
            self.config.checkpoint_interval,
        ))
    }
}

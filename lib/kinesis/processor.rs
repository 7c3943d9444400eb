use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info};

use crate::server::monitoring::INGEST_METRICS;
use crate::throttle::ThrottleGate;
use crate::transport::state::{TransportState, TransportStateCell};

use super::checkpoint::CheckpointRetrier;
use super::coordinator::{
    InitializationInput, ProcessRecordsInput, ShardProcessor, ShutdownHandle, ShutdownInput,
};
use super::sink::RecordSink;

/// Per-shard record processor: applies the throttle gate, decompresses and
/// forwards payloads in delivery order, and checkpoints periodically.
///
/// The coordination service enforces a liveness deadline on
/// `process_records`, so the throttle wait is bounded; when it expires the
/// processor aborts the whole run instead of blocking past the deadline.
pub struct RecordBatchProcessor {
    stream_name: String,
    shard_id: Option<String>,
    sink: Arc<dyn RecordSink>,
    gate: Arc<ThrottleGate>,
    state: Arc<TransportStateCell>,
    stopped_due_to_throttling: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
    retrier: CheckpointRetrier,
    max_throttle_wait: Duration,
    checkpoint_interval: Duration,
    last_checkpoint: Instant,
}

impl RecordBatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_name: impl Into<String>,
        sink: Arc<dyn RecordSink>,
        gate: Arc<ThrottleGate>,
        state: Arc<TransportStateCell>,
        stopped_due_to_throttling: Arc<AtomicBool>,
        shutdown: ShutdownHandle,
        max_throttle_wait: Duration,
        checkpoint_interval: Duration,
    ) -> Self {
        let stream_name = stream_name.into();
        let retrier = CheckpointRetrier::new(stream_name.clone());
        Self {
            stream_name,
            shard_id: None,
            sink,
            gate,
            state,
            stopped_due_to_throttling,
            shutdown,
            retrier,
            max_throttle_wait,
            checkpoint_interval,
            last_checkpoint: Instant::now(),
        }
    }

    fn shard_context(&self) -> &str {
        self.shard_id.as_deref().unwrap_or("unassigned")
    }

    /// Waits out a throttled gate. Returns false when the run must abort.
    fn wait_for_throttle_clearance(&self) -> bool {
        if !self.gate.is_throttled() {
            return true;
        }

        info!(
            "[throttled] Waiting up to {:?} for throttling to clear on stream <{}>",
            self.max_throttle_wait, self.stream_name
        );
        if self.gate.block_until_unthrottled(self.max_throttle_wait) {
            info!(
                "[unthrottled] Resuming record processing for stream <{}>",
                self.stream_name
            );
            return true;
        }

        // The coordination service would treat a callback blocked past its
        // deadline as a dead worker, so stop the whole run and let the
        // transport restart it once throttling clears.
        info!(
            "[throttled] Throttling did not clear within {:?}. Stopping the consumer for \
             stream <{}>; it will restart once unthrottled.",
            self.max_throttle_wait, self.stream_name
        );
        self.state.set(TransportState::Stopping);
        self.shutdown.request_shutdown();
        self.stopped_due_to_throttling.store(true, Ordering::SeqCst);
        if let Some(metrics) = INGEST_METRICS.get() {
            metrics.throttle_stops.inc();
        }
        false
    }

    fn forward_records(&self, input: &ProcessRecordsInput<'_>) {
        for record in &input.records {
            match decompress_gzip(&record.data) {
                Ok(payload) => match self.sink.forward(payload) {
                    Ok(()) => {
                        if let Some(metrics) = INGEST_METRICS.get() {
                            metrics.records_forwarded.inc();
                        }
                    }
                    Err(err) => {
                        error!(
                            "Couldn't forward record {} from stream <{}> shard <{}>: {}",
                            record.sequence_number,
                            self.stream_name,
                            self.shard_context(),
                            err
                        );
                        if let Some(metrics) = INGEST_METRICS.get() {
                            metrics.record_failures.inc();
                        }
                    }
                },
                Err(err) => {
                    error!(
                        "Couldn't read record {} from stream <{}> shard <{}>: {}",
                        record.sequence_number,
                        self.stream_name,
                        self.shard_context(),
                        err
                    );
                    if let Some(metrics) = INGEST_METRICS.get() {
                        metrics.record_failures.inc();
                    }
                }
            }
        }
    }

    /// Checkpoints are periodic rather than per-record; the commit itself is
    /// best-effort and bounded inside the retrier.
    fn maybe_checkpoint(&mut self, input: &ProcessRecordsInput<'_>) {
        if self.last_checkpoint.elapsed() < self.checkpoint_interval {
            return;
        }
        self.last_checkpoint = Instant::now();
        debug!("Checkpointing stream <{}>", self.stream_name);
        self.retrier.commit(input.checkpointer);
    }
}

impl ShardProcessor for RecordBatchProcessor {
    fn initialize(&mut self, input: InitializationInput) {
        info!(
            "Initializing consumer for stream <{}> shard <{}>",
            self.stream_name, input.shard_id
        );
        self.shard_id = Some(input.shard_id);
        self.state.set(TransportState::Running);
    }

    fn process_records(&mut self, input: ProcessRecordsInput<'_>) {
        debug!(
            "Received {} record(s) from stream <{}> shard <{}>",
            input.records.len(),
            self.stream_name,
            self.shard_context()
        );

        if !self.wait_for_throttle_clearance() {
            return;
        }

        self.forward_records(&input);
        self.maybe_checkpoint(&input);
    }

    fn shutdown(&mut self, input: ShutdownInput) {
        info!(
            "Shutting down consumer for stream <{}> shard <{}> ({})",
            self.stream_name,
            self.shard_context(),
            input.reason
        );
    }
}

/// Payloads arrive gzip-compressed from the log producer.
pub fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut payload = Vec::new();
    decoder.read_to_end(&mut payload)?;
    Ok(payload)
}

/// Producer-side shape of a record payload; used by the replay tooling and
/// tests.
pub fn compress_gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

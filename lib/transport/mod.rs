pub mod state;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, info};
use thiserror::Error;

use crate::config::{ConfigError, KinesisInputConfig};
use crate::kinesis::consumer::{ConsumerConfig, KinesisConsumer};
use crate::kinesis::coordinator::CoordinatorFactory;
use crate::kinesis::sink::RecordSink;
use crate::throttle::ThrottleGate;

pub use state::{TransportState, TransportStateCell};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("A consumer is already running for stream <{0}>")]
    AlreadyRunning(String),

    #[error("Couldn't spawn the Kinesis reader thread: {0}")]
    Thread(#[from] io::Error),
}

struct TransportInner {
    consumer: Option<Arc<KinesisConsumer>>,
    worker: Option<JoinHandle<()>>,
}

/// One Kinesis input: owns the throttle gate, the lifecycle cell, and the
/// dedicated reader thread for its consumer.
///
/// All of this state lives on the transport instance rather than in process
/// globals, so independent stream inputs never interfere with each other.
pub struct KinesisTransport {
    throttle: Arc<ThrottleGate>,
    state: Arc<TransportStateCell>,
    /// Set exactly when a run shut itself down because throttling outlasted
    /// the processing deadline; cleared by restart or an explicit stop.
    stopped_due_to_throttling: Arc<AtomicBool>,
    inner: Mutex<TransportInner>,
}

impl KinesisTransport {
    pub fn new() -> Self {
        Self {
            throttle: Arc::new(ThrottleGate::new()),
            state: Arc::new(TransportStateCell::new()),
            stopped_due_to_throttling: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(TransportInner {
                consumer: None,
                worker: None,
            }),
        }
    }

    /// Validates the input configuration and starts the consumer on a fresh
    /// dedicated thread. Configuration problems fail here, before any thread
    /// exists.
    pub fn launch(
        &self,
        config: KinesisInputConfig,
        factory: Box<dyn CoordinatorFactory>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<(), LaunchError> {
        config.validate()?;

        let mut inner = self.inner.lock().expect("transport poisoned");
        if let Some(worker) = &inner.worker {
            if !worker.is_finished() {
                return Err(LaunchError::AlreadyRunning(config.stream_name));
            }
        }

        let consumer = Arc::new(KinesisConsumer::new(
            ConsumerConfig::from_input(&config),
            factory,
            sink,
            Arc::clone(&self.throttle),
            Arc::clone(&self.state),
            Arc::clone(&self.stopped_due_to_throttling),
        ));

        info!(
            "Starting Kinesis reader thread for stream <{}>",
            config.stream_name
        );
        let worker = spawn_reader(&config.stream_name, Arc::clone(&consumer))?;
        inner.consumer = Some(consumer);
        inner.worker = Some(worker);
        Ok(())
    }

    /// Requests a graceful stop and waits for the reader thread to unwind.
    /// Idempotent; a no-op when nothing is running.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("transport poisoned");
        if let Some(consumer) = inner.consumer.take() {
            consumer.stop();
        }
        if let Some(worker) = inner.worker.take() {
            if worker.join().is_err() {
                error!("Kinesis reader thread panicked during shutdown");
            }
        }
        self.stopped_due_to_throttling.store(false, Ordering::SeqCst);
    }

    /// Restarts a consumer that shut itself down under throttling, once the
    /// gate clears.
    ///
    /// Blocks the calling thread on the throttle gate (unbounded), then
    /// resubmits the same consumer on a fresh reader thread. A no-op unless
    /// the previous run stopped because of throttling.
    pub fn request_restart_when_unthrottled(&self) {
        if !self.stopped_due_to_throttling.load(Ordering::SeqCst) {
            return;
        }

        info!(
            "[throttled] The Kinesis consumer stopped while throttled; waiting for throttling \
             to clear before restarting."
        );
        self.throttle.wait_until_unthrottled();

        let mut inner = self.inner.lock().expect("transport poisoned");
        // An explicit stop() may have raced us while we waited on the gate.
        if !self.stopped_due_to_throttling.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = inner.worker.take() {
            if worker.join().is_err() {
                error!("Kinesis reader thread panicked before restart");
            }
        }
        if let Some(consumer) = &inner.consumer {
            info!("[unthrottled] Restarting Kinesis consumer.");
            match spawn_reader(consumer.stream_name(), Arc::clone(consumer)) {
                Ok(worker) => inner.worker = Some(worker),
                Err(err) => error!("Couldn't restart the Kinesis reader thread: {}", err),
            }
        }
    }

    /// Relays downstream backpressure into the gate. The gate's condvar is the
    /// only synchronization point; nothing reads the flag outside it.
    pub fn set_throttled(&self, throttled: bool) {
        self.throttle.set_throttled(throttled);
    }

    pub fn is_throttled(&self) -> bool {
        self.throttle.is_throttled()
    }

    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    pub fn stopped_due_to_throttling(&self) -> bool {
        self.stopped_due_to_throttling.load(Ordering::SeqCst)
    }
}

impl Default for KinesisTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_reader(
    stream_name: &str,
    consumer: Arc<KinesisConsumer>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("kinesis-reader-{stream_name}"))
        .spawn(move || consumer.run())
}

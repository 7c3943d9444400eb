use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::Region;

/// One record as delivered by the stream: an opaque payload plus its position
/// token within the shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRecord {
    pub sequence_number: String,
    pub partition_key: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationInput {
    pub shard_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful stop was requested (by the transport or the processor itself).
    Requested,
    /// The lease was taken over by another worker.
    LeaseLost,
    /// The shard was closed; all of its records have been delivered.
    ShardEnd,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => f.write_str("requested"),
            ShutdownReason::LeaseLost => f.write_str("lease lost"),
            ShutdownReason::ShardEnd => f.write_str("shard end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownInput {
    pub reason: ShutdownReason,
}

/// Failure classes of a checkpoint commit, as reported by the coordination
/// service. Only [`CheckpointError::Throttled`] is worth retrying.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint commit throttled: {0}")]
    Throttled(String),

    #[error("coordinator is shutting down: {0}")]
    ShuttingDown(String),

    #[error("checkpoint storage rejected the commit: {0}")]
    Storage(String),
}

impl CheckpointError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckpointError::Throttled(_))
    }
}

/// Commit handle for one delivered batch: "progress up to here".
///
/// Commits are idempotent; committing the same position twice, or completing
/// commits out of order, must be harmless. A later checkpoint supersedes an
/// earlier one.
pub trait Checkpointer: Send + Sync {
    fn checkpoint(&self) -> Result<(), CheckpointError>;
}

/// A batch of records plus the checkpoint handle covering it. Consumed exactly
/// once per poll cycle.
pub struct ProcessRecordsInput<'a> {
    pub records: Vec<ShardRecord>,
    pub checkpointer: &'a dyn Checkpointer,
}

/// The initialize/processRecords/shutdown callback triple the coordination
/// service drives for each leased shard.
pub trait ShardProcessor: Send {
    fn initialize(&mut self, input: InitializationInput);
    fn process_records(&mut self, input: ProcessRecordsInput<'_>);
    fn shutdown(&mut self, input: ShutdownInput);
}

/// Stamps out one [`ShardProcessor`] per leased shard.
pub trait ShardProcessorFactory: Send + Sync {
    fn create(&self) -> Box<dyn ShardProcessor>;
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("shard lease coordination failed: {0}")]
    Lease(String),

    #[error("stream unavailable: {0}")]
    Stream(String),
}

/// Cloneable cancel handle for a running coordinator.
///
/// It must be safe to fire from any thread, including from inside a
/// [`ShardProcessor`] callback (the throttle-timeout abort path), and firing
/// it more than once must be harmless.
#[derive(Clone)]
pub struct ShutdownHandle {
    signal: Arc<dyn Fn() + Send + Sync>,
}

impl ShutdownHandle {
    pub fn new(signal: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            signal: Arc::new(signal),
        }
    }

    pub fn request_shutdown(&self) {
        (self.signal)();
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShutdownHandle")
    }
}

/// Everything the coordination service needs to lease shards for one stream.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Unique per input; the coordination service keys its lease/checkpoint
    /// state by this name, so two streams must never share one.
    pub application_name: String,
    pub worker_id: String,
    pub stream_name: String,
    pub region: Region,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub assume_role_arn: Option<String>,
    pub proxy_url: Option<String>,
    /// Upper bound on records per fetched batch, when set.
    pub max_records: Option<usize>,
}

/// The external shard lease/checkpoint coordination service.
///
/// `run` blocks on the calling thread, driving processor callbacks until a
/// shutdown is requested or the service unwinds on its own. Processing
/// callbacks must return within the service's liveness deadline or the worker
/// is considered hung and its leases are reassigned.
pub trait LeaseCoordinator: Send {
    fn run(&mut self, factory: &dyn ShardProcessorFactory) -> Result<(), CoordinatorError>;

    /// Handle that requests a graceful shutdown of a `run` in progress.
    fn shutdown_handle(&self) -> ShutdownHandle;
}

/// Builds a coordinator client for one consumer run.
pub trait CoordinatorFactory: Send + Sync {
    fn build(&self, config: &CoordinatorConfig) -> Result<Box<dyn LeaseCoordinator>, CoordinatorError>;
}

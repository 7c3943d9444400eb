//! Throttle-aware Kinesis stream consumption.
//!
//! The shard lease/checkpoint coordination service is an external dependency
//! reached only through the traits in [`coordinator`]. Everything else in this
//! module is the consumer runtime: the per-shard batch processor, the
//! checkpoint retrier, and the worker that owns one blocking consume run.

pub mod checkpoint;
pub mod consumer;
pub mod coordinator;
pub mod local;
pub mod processor;
pub mod sink;

#[cfg(test)]
mod test_support;


pub use checkpoint::CheckpointRetrier;
pub use consumer::{ConsumerConfig, KinesisConsumer};
pub use coordinator::{
    CheckpointError, Checkpointer, CoordinatorConfig, CoordinatorError, CoordinatorFactory,
    InitializationInput, LeaseCoordinator, ProcessRecordsInput, ShardProcessor,
    ShardProcessorFactory, ShardRecord, ShutdownHandle, ShutdownInput, ShutdownReason,
};
pub use local::{InMemoryCheckpointStore, LocalCoordinatorFactory, LocalStreamCoordinator};
pub use processor::{compress_gzip, decompress_gzip, RecordBatchProcessor};
pub use sink::{ChannelSink, RecordSink, SinkError};

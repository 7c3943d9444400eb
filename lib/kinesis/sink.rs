use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("downstream pipeline is closed")]
    Closed,

    #[error("downstream pipeline rejected the payload: {0}")]
    Rejected(String),
}

/// Boundary to the downstream pipeline. One sink is shared by every shard
/// processor of a transport, so implementations must be thread-safe.
pub trait RecordSink: Send + Sync {
    fn forward(&self, payload: Vec<u8>) -> Result<(), SinkError>;
}

/// Hands decompressed payloads to the pipeline over a flume channel.
pub struct ChannelSink {
    tx: flume::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

impl RecordSink for ChannelSink {
    fn forward(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        self.tx.send(payload).map_err(|_| SinkError::Closed)
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::coordinator::{CheckpointError, Checkpointer, ShardRecord, ShutdownHandle};
use super::processor::compress_gzip;
use super::sink::{RecordSink, SinkError};

pub(crate) fn gzip_payload(payload: &[u8]) -> Vec<u8> {
    compress_gzip(payload).expect("gzip payload")
}

pub(crate) fn record(sequence: u64, payload: &[u8]) -> ShardRecord {
    ShardRecord {
        sequence_number: format!("{sequence:010}"),
        partition_key: format!("pk-{sequence}"),
        data: gzip_payload(payload),
    }
}

/// A record whose payload is not valid gzip.
pub(crate) fn corrupt_record(sequence: u64) -> ShardRecord {
    ShardRecord {
        sequence_number: format!("{sequence:010}"),
        partition_key: format!("pk-{sequence}"),
        data: b"definitely not gzip".to_vec(),
    }
}

enum WhenExhausted {
    Succeed,
    Throttle,
}

/// Checkpointer driven by a scripted outcome plan: the plan is consumed front
/// to back, then the exhausted behavior repeats.
pub(crate) struct ScriptedCheckpointer {
    plan: Mutex<VecDeque<Result<(), CheckpointError>>>,
    when_exhausted: WhenExhausted,
    calls: AtomicUsize,
}

impl ScriptedCheckpointer {
    pub(crate) fn succeeding() -> Self {
        Self::with_plan(Vec::new())
    }

    pub(crate) fn with_plan(plan: Vec<Result<(), CheckpointError>>) -> Self {
        Self {
            plan: Mutex::new(plan.into_iter().collect()),
            when_exhausted: WhenExhausted::Succeed,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always_throttled() -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            when_exhausted: WhenExhausted::Throttle,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Checkpointer for ScriptedCheckpointer {
    fn checkpoint(&self) -> Result<(), CheckpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.plan.lock().expect("plan poisoned").pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => match self.when_exhausted {
                WhenExhausted::Succeed => Ok(()),
                WhenExhausted::Throttle => Err(CheckpointError::Throttled("scripted".into())),
            },
        }
    }
}

/// Sink that records every forwarded payload, optionally rejecting chosen
/// payloads to exercise the skip-and-continue path.
#[derive(Default)]
pub(crate) struct CollectingSink {
    forwarded: Mutex<Vec<Vec<u8>>>,
    rejected: Mutex<Vec<Vec<u8>>>,
}

impl CollectingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reject_payload(&self, payload: &[u8]) {
        self.rejected
            .lock()
            .expect("sink poisoned")
            .push(payload.to_vec());
    }

    pub(crate) fn forwarded(&self) -> Vec<Vec<u8>> {
        self.forwarded.lock().expect("sink poisoned").clone()
    }
}

impl RecordSink for CollectingSink {
    fn forward(&self, payload: Vec<u8>) -> Result<(), SinkError> {
        if self
            .rejected
            .lock()
            .expect("sink poisoned")
            .iter()
            .any(|rejected| rejected == &payload)
        {
            return Err(SinkError::Rejected("scripted rejection".into()));
        }
        self.forwarded.lock().expect("sink poisoned").push(payload);
        Ok(())
    }
}

/// Shutdown handle that only counts how often it fires.
pub(crate) fn counting_shutdown_handle() -> (ShutdownHandle, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let handle = ShutdownHandle::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (handle, count)
}

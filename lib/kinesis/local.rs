use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::debug;

use super::coordinator::{
    CheckpointError, Checkpointer, CoordinatorConfig, CoordinatorError, CoordinatorFactory,
    InitializationInput, LeaseCoordinator, ProcessRecordsInput, ShardProcessorFactory,
    ShardRecord, ShutdownHandle, ShutdownInput, ShutdownReason,
};

/// Last-wins checkpoint store: one committed sequence token per shard.
///
/// Committing the same token twice is a harmless overwrite, and a later
/// commit silently supersedes an earlier one.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    committed: Mutex<HashMap<String, String>>,
    commit_count: Mutex<u64>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&self, shard_id: &str, sequence: &str) {
        self.committed
            .lock()
            .expect("checkpoint store poisoned")
            .insert(shard_id.to_string(), sequence.to_string());
        *self.commit_count.lock().expect("checkpoint store poisoned") += 1;
    }

    pub fn committed(&self, shard_id: &str) -> Option<String> {
        self.committed
            .lock()
            .expect("checkpoint store poisoned")
            .get(shard_id)
            .cloned()
    }

    pub fn commit_count(&self) -> u64 {
        *self.commit_count.lock().expect("checkpoint store poisoned")
    }
}

/// Commit handle for one delivered batch.
struct StoreCheckpointer {
    store: Arc<InMemoryCheckpointStore>,
    shard_id: String,
    /// None until the shard has delivered at least one record (heartbeats).
    sequence: Option<String>,
}

impl Checkpointer for StoreCheckpointer {
    fn checkpoint(&self) -> Result<(), CheckpointError> {
        if let Some(sequence) = &self.sequence {
            self.store.commit(&self.shard_id, sequence);
        }
        Ok(())
    }
}

struct ShutdownFlag {
    requested: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownFlag {
    fn new() -> Self {
        Self {
            requested: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn request(&self) {
        let mut requested = self.requested.lock().expect("shutdown flag poisoned");
        *requested = true;
        drop(requested);
        self.cond.notify_all();
    }

    fn is_requested(&self) -> bool {
        *self.requested.lock().expect("shutdown flag poisoned")
    }

    /// Sleeps up to `timeout`, waking early on a shutdown request. Returns
    /// true when shutdown was requested.
    fn wait_for(&self, timeout: Duration) -> bool {
        let requested = self.requested.lock().expect("shutdown flag poisoned");
        let (requested, _) = self
            .cond
            .wait_timeout_while(requested, timeout, |r| !*r)
            .expect("shutdown flag poisoned");
        *requested
    }
}

/// In-process, single-shard coordinator used by the replay binary and the
/// integration tests.
///
/// The scripted batches model the stream itself, so they are never consumed:
/// each run starts after the committed checkpoint and walks forward, which
/// means records delivered but not checkpointed before a shutdown are
/// re-delivered by the next run (at-least-once). While past the end of the
/// script the coordinator delivers empty heartbeat batches every
/// `poll_interval`. Sequence tokens must sort lexically (zero-pad numeric
/// tokens).
pub struct LocalStreamCoordinator {
    shard_id: String,
    batches: Arc<Mutex<Vec<Vec<ShardRecord>>>>,
    store: Arc<InMemoryCheckpointStore>,
    poll_interval: Duration,
    flag: Arc<ShutdownFlag>,
}

impl LeaseCoordinator for LocalStreamCoordinator {
    fn run(&mut self, factory: &dyn ShardProcessorFactory) -> Result<(), CoordinatorError> {
        let mut processor = factory.create();
        processor.initialize(InitializationInput {
            shard_id: self.shard_id.clone(),
        });

        let resume_after = self.store.committed(&self.shard_id);
        let mut cursor = 0usize;
        let mut last_delivered = resume_after.clone();

        while !self.flag.is_requested() {
            let batch = {
                let batches = self.batches.lock().expect("batch script poisoned");
                batches.get(cursor).cloned()
            };

            let records = match batch {
                Some(records) => {
                    cursor += 1;
                    // Drop anything at or below the committed position, the
                    // way a resumed lease replays only uncheckpointed records.
                    let records: Vec<_> = records
                        .into_iter()
                        .filter(|record| match &resume_after {
                            Some(committed) => record.sequence_number.as_str() > committed.as_str(),
                            None => true,
                        })
                        .collect();
                    if records.is_empty() {
                        continue;
                    }
                    records
                }
                None => {
                    if self.flag.wait_for(self.poll_interval) {
                        break;
                    }
                    Vec::new()
                }
            };

            if let Some(record) = records.last() {
                last_delivered = Some(record.sequence_number.clone());
            }

            let checkpointer = StoreCheckpointer {
                store: Arc::clone(&self.store),
                shard_id: self.shard_id.clone(),
                sequence: last_delivered.clone(),
            };
            processor.process_records(ProcessRecordsInput {
                records,
                checkpointer: &checkpointer,
            });
        }

        debug!("Local coordinator for shard <{}> unwinding", self.shard_id);
        processor.shutdown(ShutdownInput {
            reason: ShutdownReason::Requested,
        });
        Ok(())
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        let flag = Arc::clone(&self.flag);
        ShutdownHandle::new(move || flag.request())
    }
}

/// Builds [`LocalStreamCoordinator`]s that share one batch script and one
/// checkpoint store, so a restarted consumer resumes from the last committed
/// checkpoint. Clones share the same script and store.
#[derive(Clone)]
pub struct LocalCoordinatorFactory {
    shard_id: String,
    batches: Arc<Mutex<Vec<Vec<ShardRecord>>>>,
    store: Arc<InMemoryCheckpointStore>,
    poll_interval: Duration,
}

impl LocalCoordinatorFactory {
    pub fn new(
        shard_id: impl Into<String>,
        batches: Vec<Vec<ShardRecord>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            batches: Arc::new(Mutex::new(batches)),
            store: Arc::new(InMemoryCheckpointStore::new()),
            poll_interval,
        }
    }

    pub fn store(&self) -> Arc<InMemoryCheckpointStore> {
        Arc::clone(&self.store)
    }

    /// Appends a batch to the stream script; a running coordinator picks it
    /// up on its next poll.
    pub fn push_batch(&self, records: Vec<ShardRecord>) {
        self.batches
            .lock()
            .expect("batch script poisoned")
            .push(records);
    }
}

impl CoordinatorFactory for LocalCoordinatorFactory {
    fn build(&self, _config: &CoordinatorConfig) -> Result<Box<dyn LeaseCoordinator>, CoordinatorError> {
        Ok(Box::new(LocalStreamCoordinator {
            shard_id: self.shard_id.clone(),
            batches: Arc::clone(&self.batches),
            store: Arc::clone(&self.store),
            poll_interval: self.poll_interval,
            flag: Arc::new(ShutdownFlag::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_idempotent_and_last_wins() {
        let store = InMemoryCheckpointStore::new();
        store.commit("shard-0001", "0000000005");
        store.commit("shard-0001", "0000000005");
        assert_eq!(store.committed("shard-0001").as_deref(), Some("0000000005"));

        // A later commit supersedes, even when an earlier one lands after it.
        store.commit("shard-0001", "0000000009");
        assert_eq!(store.committed("shard-0001").as_deref(), Some("0000000009"));
        assert_eq!(store.commit_count(), 3);
    }

    #[test]
    fn heartbeat_checkpointer_without_sequence_is_a_no_op() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let checkpointer = StoreCheckpointer {
            store: Arc::clone(&store),
            shard_id: "shard-0001".to_string(),
            sequence: None,
        };
        checkpointer.checkpoint().expect("no-op commit");
        assert!(store.committed("shard-0001").is_none());
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn shutdown_flag_wakes_waiters_early() {
        let flag = Arc::new(ShutdownFlag::new());
        let waiter = {
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || flag.wait_for(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        flag.request();
        assert!(waiter.join().expect("waiter panicked"));
    }
}

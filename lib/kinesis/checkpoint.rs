use std::time::Duration;

use log::{debug, error, warn};

use crate::retry::{run_with_retry, RetryPolicy};
use crate::server::monitoring::INGEST_METRICS;

use super::coordinator::{CheckpointError, Checkpointer};

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const RETRY_WINDOW: Duration = Duration::from_secs(600);

/// Bounded-retry wrapper around one checkpoint commit.
///
/// Commits are best-effort: every terminal outcome is logged and absorbed
/// here, because an error escaping the processing callback would cost the
/// shard lease. Losing one commit is bounded progress loss; the next
/// successful checkpoint supersedes it.
pub struct CheckpointRetrier {
    stream_name: String,
    policy: RetryPolicy,
}

impl CheckpointRetrier {
    /// The coordination service throttles checkpoint storage under load, so
    /// the default policy spaces attempts one second apart for up to ten
    /// minutes.
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self::with_policy(stream_name, RetryPolicy::fixed(RETRY_INTERVAL, RETRY_WINDOW))
    }

    pub fn with_policy(stream_name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            stream_name: stream_name.into(),
            policy,
        }
    }

    pub fn commit(&self, checkpointer: &dyn Checkpointer) {
        let result = run_with_retry(
            &self.policy,
            |attempt| {
                if attempt > 1 {
                    warn!(
                        "Checkpointing stream <{}> failed, retrying (attempt {})",
                        self.stream_name, attempt
                    );
                }
                checkpointer.checkpoint()
            },
            CheckpointError::is_transient,
        );

        match result {
            Ok((_, attempts)) => {
                debug!(
                    "Checkpointed stream <{}> after {} attempt(s)",
                    self.stream_name, attempts
                );
            }
            Err(terminal) if terminal.exhausted => {
                error!(
                    "Checkpoint retries for stream <{}> finally failed after {} attempts: {}",
                    self.stream_name, terminal.attempts, terminal.error
                );
                if let Some(metrics) = INGEST_METRICS.get() {
                    metrics.checkpoint_failures.inc();
                }
            }
            Err(terminal) => match terminal.error {
                CheckpointError::ShuttingDown(reason) => {
                    debug!(
                        "Consumer for stream <{}> is shutting down, skipping checkpoint: {}",
                        self.stream_name, reason
                    );
                }
                err => {
                    error!(
                        "Couldn't save checkpoint for stream <{}>: {}",
                        self.stream_name, err
                    );
                    if let Some(metrics) = INGEST_METRICS.get() {
                        metrics.checkpoint_failures.inc();
                    }
                }
            },
        }
    }
}

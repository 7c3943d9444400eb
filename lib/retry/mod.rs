use std::thread;
use std::time::{Duration, Instant};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryInterval {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

/// How long a retried operation may keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// Total attempts, including the first.
    MaxAttempts(u32),
    /// Wall-clock window measured from the first attempt.
    MaxElapsed(Duration),
}

/// Explicit retry policy consumed by [`run_with_retry`].
///
/// The caller supplies the retryable-error predicate separately, so one policy
/// can be shared across operations with different failure taxonomies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: RetryInterval,
    pub budget: RetryBudget,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, window: Duration) -> Self {
        Self {
            interval: RetryInterval::Fixed(interval),
            budget: RetryBudget::MaxElapsed(window),
        }
    }

    /// Delay before the attempt after `attempt` (1-based) has failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.interval {
            RetryInterval::Fixed(interval) => interval,
            RetryInterval::Exponential { initial, max } => {
                let shift = u32::min(attempt.saturating_sub(1), 20);
                let scaled_ms = initial.as_millis().saturating_mul(1u128 << shift);
                let capped_ms = scaled_ms.min(max.as_millis());
                Duration::from_millis(capped_ms.min(u64::MAX as u128) as u64)
            }
        }
    }
}

/// Terminal state returned by the shared retry runner.
#[derive(Debug)]
pub struct RetryTerminal<E> {
    pub error: E,
    pub attempts: u32,
    /// True when the last error was retryable but the budget ran out.
    pub exhausted: bool,
}

/// Executes one fallible operation under `policy` on the calling thread.
///
/// `op` receives the 1-based attempt number so callers can log retries.
/// Non-retryable errors return immediately with `exhausted == false`.
pub fn run_with_retry<T, E, F, R>(
    policy: &RetryPolicy,
    mut op: F,
    mut is_retryable: R,
) -> Result<(T, u32), RetryTerminal<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    R: FnMut(&E) -> bool,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        match op(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(RetryTerminal {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }

                let delay = policy.delay_for(attempt);
                let budget_allows_another = match policy.budget {
                    RetryBudget::MaxAttempts(max) => attempt < max.max(1),
                    RetryBudget::MaxElapsed(window) => started.elapsed() + delay < window,
                };
                if !budget_allows_another {
                    return Err(RetryTerminal {
                        error,
                        attempts: attempt,
                        exhausted: true,
                    });
                }

                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}

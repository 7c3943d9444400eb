use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

struct GateState {
    throttled: bool,
    last_transition: Instant,
}

/// Shared backpressure flag between the record-processing thread and whatever
/// thread observes downstream health.
///
/// All access goes through the gate's own mutex; waiters park on a condvar and
/// are woken on every transition, so there is no polling loop anywhere.
pub struct ThrottleGate {
    state: Mutex<GateState>,
    unthrottled: Condvar,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                throttled: false,
                last_transition: Instant::now(),
            }),
            unthrottled: Condvar::new(),
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.state.lock().expect("throttle gate poisoned").throttled
    }

    /// Instant of the most recent throttled/unthrottled transition.
    pub fn last_transition(&self) -> Instant {
        self.state
            .lock()
            .expect("throttle gate poisoned")
            .last_transition
    }

    /// Flips the gate. Re-asserting the current value is a no-op; a real
    /// transition wakes every waiter.
    pub fn set_throttled(&self, throttled: bool) {
        let mut state = self.state.lock().expect("throttle gate poisoned");
        if state.throttled == throttled {
            return;
        }
        state.throttled = throttled;
        state.last_transition = Instant::now();
        debug!(
            "throttle gate transitioned to {}",
            if throttled { "throttled" } else { "unthrottled" }
        );
        drop(state);
        self.unthrottled.notify_all();
    }

    /// Blocks until the gate clears or `timeout` elapses.
    ///
    /// Returns true if unthrottled at return. A false return is a normal
    /// outcome, not a failure.
    pub fn block_until_unthrottled(&self, timeout: Duration) -> bool {
        let state = self.state.lock().expect("throttle gate poisoned");
        let (state, _timed_out) = self
            .unthrottled
            .wait_timeout_while(state, timeout, |s| s.throttled)
            .expect("throttle gate poisoned");
        !state.throttled
    }

    /// Blocks until the gate clears, with no deadline. Only the transport's
    /// restart path uses this; the processing path always bounds its wait.
    pub fn wait_until_unthrottled(&self) {
        let state = self.state.lock().expect("throttle gate poisoned");
        let _state = self
            .unthrottled
            .wait_while(state, |s| s.throttled)
            .expect("throttle gate poisoned");
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one consumer run. Transitions are linear within a run:
/// STARTING -> RUNNING -> STOPPING -> STOPPED; a restart begins a fresh run
/// back at STARTING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Starting => "STARTING",
            TransportState::Running => "RUNNING",
            TransportState::Stopping => "STOPPING",
            TransportState::Stopped => "STOPPED",
        }
    }

    fn from_u8(raw: u8) -> TransportState {
        match raw {
            0 => TransportState::Starting,
            1 => TransportState::Running,
            2 => TransportState::Stopping,
            _ => TransportState::Stopped,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared lifecycle cell: written by the worker thread, read from anywhere.
#[derive(Debug)]
pub struct TransportStateCell(AtomicU8);

impl TransportStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(TransportState::Stopped as u8))
    }

    pub fn set(&self, state: TransportState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

impl Default for TransportStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_starts_stopped_and_round_trips() {
        let cell = TransportStateCell::new();
        assert_eq!(cell.get(), TransportState::Stopped);
        for state in [
            TransportState::Starting,
            TransportState::Running,
            TransportState::Stopping,
            TransportState::Stopped,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}

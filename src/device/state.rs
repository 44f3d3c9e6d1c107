use std::sync::{Mutex, MutexGuard};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Cancelling,
}

/// How a run left the Running/Cancelling states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// Duration exhausted without a STOP.
    Completed,
    /// STOP was accepted while running.
    Cancelled,
}

/// The one shared test-run state machine.
///
/// Every transition takes the lock once and never holds it across I/O or sleep.
/// Idle -> Running (`try_start`), Running -> Cancelling (`request_cancel`),
/// Running|Cancelling -> Idle (`finish`, broadcaster only).
#[derive(Debug)]
pub struct TestState {
    state: Mutex<RunState>,
}

impl TestState {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn try_start(&self) -> bool {
        let mut state = self.lock();
        if *state != RunState::Idle {
            return false;
        }
        *state = RunState::Running;
        true
    }

    pub fn request_cancel(&self) -> bool {
        let mut state = self.lock();
        if *state != RunState::Running {
            return false;
        }
        *state = RunState::Cancelling;
        true
    }

    pub fn observe_cancelled(&self) -> bool {
        *self.lock() == RunState::Cancelling
    }

    pub fn finish(&self) -> RunEnd {
        let mut state = self.lock();
        let end = match *state {
            RunState::Cancelling => RunEnd::Cancelled,
            RunState::Running => RunEnd::Completed,
            RunState::Idle => {
                warn!("finish() called with no active run");
                RunEnd::Completed
            }
        };
        *state = RunState::Idle;
        end
    }

    pub fn current(&self) -> RunState {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TestState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn start_only_from_idle() {
        let s = TestState::new();
        assert!(s.try_start());
        assert_eq!(s.current(), RunState::Running);
        assert!(!s.try_start());
        assert!(s.request_cancel());
        assert!(!s.try_start());
        assert_eq!(s.current(), RunState::Cancelling);
    }

    #[test]
    fn cancel_only_from_running() {
        let s = TestState::new();
        assert!(!s.request_cancel());
        assert!(s.try_start());
        assert!(!s.observe_cancelled());
        assert!(s.request_cancel());
        assert!(s.observe_cancelled());
        assert!(!s.request_cancel());
    }

    #[test]
    fn finish_reports_how_the_run_ended() {
        let s = TestState::new();
        assert!(s.try_start());
        assert_eq!(s.finish(), RunEnd::Completed);
        assert_eq!(s.current(), RunState::Idle);

        assert!(s.try_start());
        assert!(s.request_cancel());
        assert_eq!(s.finish(), RunEnd::Cancelled);
        assert_eq!(s.current(), RunState::Idle);
        assert!(!s.request_cancel());
    }

    #[test]
    fn finish_while_idle_stays_idle() {
        let s = TestState::new();
        assert_eq!(s.finish(), RunEnd::Completed);
        assert_eq!(s.current(), RunState::Idle);
        assert!(s.try_start());
    }

    #[test]
    fn racing_starts_admit_exactly_one() {
        let s = Arc::new(TestState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                thread::spawn(move || s.try_start())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}

//! Cross-manager system signals.
//!
//! A small durable signal set shared by every manager, used for conditions
//! that do not belong to any single state machine: persistent-storage
//! failure (degraded mode) and an operator-requested reboot. Signals are
//! level-triggered; once raised they stay observable.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::manager::WaitOutcome;

/// Process-wide conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSignal {
    /// The persistent store failed; local recovery mode is warranted.
    StorageDegraded,
    /// An operator asked for a restart through the portal.
    RebootRequested,
}

impl SystemSignal {
    fn mask(self) -> u32 {
        match self {
            Self::StorageDegraded => 1 << 0,
            Self::RebootRequested => 1 << 1,
        }
    }
}

/// Cloneable handle to the shared signal set.
#[derive(Clone, Default)]
pub struct SystemEvents {
    shared: Arc<(Mutex<u32>, Condvar)>,
}

impl SystemEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a signal. Idempotent.
    pub fn raise(&self, signal: SystemSignal) {
        let (lock, condvar) = &*self.shared;
        let mut raised = lock.lock().unwrap_or_else(|p| p.into_inner());
        *raised |= signal.mask();
        condvar.notify_all();
    }

    pub fn is_raised(&self, signal: SystemSignal) -> bool {
        let (lock, _) = &*self.shared;
        *lock.lock().unwrap_or_else(|p| p.into_inner()) & signal.mask() != 0
    }

    /// Block until the signal is raised.
    pub fn wait(&self, signal: SystemSignal, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let (lock, condvar) = &*self.shared;
        let mut raised = lock.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if *raised & signal.mask() != 0 {
                return WaitOutcome::Reached;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = condvar
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            raised = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_raise_and_observe() {
        let events = SystemEvents::new();
        assert!(!events.is_raised(SystemSignal::StorageDegraded));
        events.raise(SystemSignal::StorageDegraded);
        assert!(events.is_raised(SystemSignal::StorageDegraded));
        assert!(!events.is_raised(SystemSignal::RebootRequested));
    }

    #[test]
    fn test_wait_wakes_on_raise() {
        let events = SystemEvents::new();
        let waiter = {
            let events = events.clone();
            thread::spawn(move || {
                events.wait(SystemSignal::StorageDegraded, Duration::from_secs(5))
            })
        };
        thread::sleep(Duration::from_millis(20));
        events.raise(SystemSignal::StorageDegraded);
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Reached);
    }

    #[test]
    fn test_wait_times_out() {
        let events = SystemEvents::new();
        assert_eq!(
            events.wait(SystemSignal::RebootRequested, Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );
    }
}

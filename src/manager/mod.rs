//! Manager actor primitives.
//!
//! Every manager in this crate has the same concurrency shape: a dedicated
//! worker thread consumes requested-state signals from a [`Mailbox`],
//! validates and executes transitions, and republishes current-state signals
//! through a [`StateCell`]. Callers only ever enqueue requests and wait on
//! published states.
//!
//! Two deliberately different signal types replace the ad hoc bit flags the
//! shape was modeled on:
//!
//! - Requests are **one-shot**: coalesced while pending (posting the same
//!   request twice is one request) and cleared when the worker consumes them.
//! - Published states are **durable**: once published, a state stays
//!   observable to every waiter, including late subscribers, even after the
//!   manager has moved on. Waiting never consumes a state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A manager's request alphabet.
///
/// `PRIORITY` is the fixed order the worker uses when several requests are
/// pending at once; each manager documents its own choice.
pub trait RequestKind: Copy + Eq + fmt::Debug + Send + 'static {
    const PRIORITY: &'static [Self];
}

/// A manager's state alphabet, one signal bit per state.
pub trait StateKind: Copy + Eq + fmt::Debug + Send + 'static {
    fn mask(self) -> u32;
}

/// Result of a bounded wait on published states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_reached(self) -> bool {
        self == Self::Reached
    }
}

/// A state request the manager refused to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRejected {
    pub reason: &'static str,
}

impl fmt::Display for RequestRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state request rejected: {}", self.reason)
    }
}

impl std::error::Error for RequestRejected {}

/// What a worker pulls out of its mailbox.
#[derive(Debug)]
pub enum Msg<R, E> {
    /// A caller asked for a state transition.
    Request(R),
    /// A subsystem completion (radio event, timer expiry, ...).
    Event(E),
}

struct MailboxInner<R, E> {
    pending: Vec<R>,
    events: VecDeque<E>,
    closed: bool,
}

/// Coalescing request queue plus subsystem event FIFO.
///
/// The worker blocks on [`Mailbox::next`]; events are delivered before
/// requests since they complete the operation the current state is already
/// in the middle of.
pub struct Mailbox<R, E> {
    shared: Arc<(Mutex<MailboxInner<R, E>>, Condvar)>,
}

impl<R, E> Clone for Mailbox<R, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: RequestKind, E: Send + 'static> Mailbox<R, E> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new((
                Mutex::new(MailboxInner {
                    pending: Vec::new(),
                    events: VecDeque::new(),
                    closed: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Enqueue a state request. Duplicate pending requests coalesce.
    pub fn post_request(&self, request: R) {
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        if inner.closed {
            return;
        }
        if !inner.pending.contains(&request) {
            inner.pending.push(request);
        }
        condvar.notify_all();
    }

    /// Enqueue a subsystem event.
    pub fn post_event(&self, event: E) {
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        if inner.closed {
            return;
        }
        inner.events.push_back(event);
        condvar.notify_all();
    }

    /// Block until something is pending. Returns `None` once the mailbox is
    /// closed and drained, which is the worker's exit signal.
    pub fn next(&self) -> Option<Msg<R, E>> {
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if let Some(event) = inner.events.pop_front() {
                return Some(Msg::Event(event));
            }
            if let Some(request) = Self::take_by_priority(&mut inner.pending) {
                return Some(Msg::Request(request));
            }
            if inner.closed {
                return None;
            }
            inner = condvar
                .wait(inner)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Whether [`Mailbox::close`] has been called.
    pub fn is_closed(&self) -> bool {
        let (lock, _) = &*self.shared;
        lock.lock().unwrap_or_else(|p| p.into_inner()).closed
    }

    /// Close the mailbox; pending messages are still delivered.
    pub fn close(&self) {
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        inner.closed = true;
        condvar.notify_all();
    }

    fn take_by_priority(pending: &mut Vec<R>) -> Option<R> {
        for &candidate in R::PRIORITY {
            if let Some(idx) = pending.iter().position(|&r| r == candidate) {
                pending.remove(idx);
                return Some(candidate);
            }
        }
        // A request kind missing from PRIORITY is a programming error; drain
        // it anyway rather than spinning on it forever.
        pending.pop()
    }
}

impl<R: RequestKind, E: Send + 'static> Default for Mailbox<R, E> {
    fn default() -> Self {
        Self::new()
    }
}

struct StateCellInner<S> {
    current: S,
    seen: u32,
}

/// Durable published-state cell.
///
/// Holds the manager's current state plus the set of every state published
/// so far. A waiter blocked on state X observes X even if the manager later
/// moves past it; intermediate states may be skipped by a slow waiter but
/// are never lost from the set.
pub struct StateCell<S> {
    shared: Arc<(Mutex<StateCellInner<S>>, Condvar)>,
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: StateKind> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            shared: Arc::new((
                Mutex::new(StateCellInner {
                    current: initial,
                    seen: initial.mask(),
                }),
                Condvar::new(),
            )),
        }
    }

    /// Publish a newly reached state.
    ///
    /// Publishing the current state again is a no-op: re-requesting a state
    /// the manager is already in must not re-signal waiters.
    pub fn publish(&self, state: S) {
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        if inner.current == state {
            return;
        }
        inner.current = state;
        inner.seen |= state.mask();
        condvar.notify_all();
    }

    /// The state the worker most recently published.
    pub fn current(&self) -> S {
        let (lock, _) = &*self.shared;
        lock.lock().unwrap_or_else(|p| p.into_inner()).current
    }

    /// Whether a state has ever been published.
    pub fn reached(&self, state: S) -> bool {
        let (lock, _) = &*self.shared;
        lock.lock().unwrap_or_else(|p| p.into_inner()).seen & state.mask() != 0
    }

    /// Block until any state in `mask` has been published.
    pub fn wait_any(&self, mask: u32, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let (lock, condvar) = &*self.shared;
        let mut inner = lock.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if inner.seen & mask != 0 {
                return WaitOutcome::Reached;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = condvar
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|p| p.into_inner());
            inner = guard;
        }
    }

    /// Block until one specific state has been published.
    pub fn wait_until(&self, state: S, timeout: Duration) -> WaitOutcome {
        self.wait_any(state.mask(), timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestRequest {
        Stop,
        Go,
    }

    impl RequestKind for TestRequest {
        const PRIORITY: &'static [Self] = &[Self::Stop, Self::Go];
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestState {
        Idle,
        Running,
        Done,
    }

    impl StateKind for TestState {
        fn mask(self) -> u32 {
            match self {
                Self::Idle => 1 << 0,
                Self::Running => 1 << 1,
                Self::Done => 1 << 2,
            }
        }
    }

    #[derive(Debug, PartialEq)]
    struct TestEvent(u32);

    #[test]
    fn test_requests_coalesce() {
        let mailbox: Mailbox<TestRequest, TestEvent> = Mailbox::new();
        mailbox.post_request(TestRequest::Go);
        mailbox.post_request(TestRequest::Go);
        mailbox.post_request(TestRequest::Go);
        mailbox.close();

        assert!(matches!(
            mailbox.next(),
            Some(Msg::Request(TestRequest::Go))
        ));
        assert!(mailbox.next().is_none());
    }

    #[test]
    fn test_priority_order_over_arrival_order() {
        let mailbox: Mailbox<TestRequest, TestEvent> = Mailbox::new();
        mailbox.post_request(TestRequest::Go);
        mailbox.post_request(TestRequest::Stop);
        mailbox.close();

        // Stop outranks Go regardless of arrival order.
        assert!(matches!(
            mailbox.next(),
            Some(Msg::Request(TestRequest::Stop))
        ));
        assert!(matches!(
            mailbox.next(),
            Some(Msg::Request(TestRequest::Go))
        ));
    }

    #[test]
    fn test_events_delivered_before_requests_in_order() {
        let mailbox: Mailbox<TestRequest, TestEvent> = Mailbox::new();
        mailbox.post_request(TestRequest::Stop);
        mailbox.post_event(TestEvent(1));
        mailbox.post_event(TestEvent(2));
        mailbox.close();

        assert!(matches!(mailbox.next(), Some(Msg::Event(TestEvent(1)))));
        assert!(matches!(mailbox.next(), Some(Msg::Event(TestEvent(2)))));
        assert!(matches!(
            mailbox.next(),
            Some(Msg::Request(TestRequest::Stop))
        ));
    }

    #[test]
    fn test_next_blocks_until_post() {
        let mailbox: Mailbox<TestRequest, TestEvent> = Mailbox::new();
        let worker = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.next())
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.post_request(TestRequest::Go);
        assert!(matches!(
            worker.join().unwrap(),
            Some(Msg::Request(TestRequest::Go))
        ));
    }

    #[test]
    fn test_closed_mailbox_drops_new_posts() {
        let mailbox: Mailbox<TestRequest, TestEvent> = Mailbox::new();
        mailbox.close();
        mailbox.post_request(TestRequest::Go);
        assert!(mailbox.next().is_none());
    }

    #[test]
    fn test_state_is_durable_for_late_waiters() {
        let cell = StateCell::new(TestState::Idle);
        cell.publish(TestState::Running);
        cell.publish(TestState::Done);

        // Running was superseded but stays observable.
        assert_eq!(
            cell.wait_until(TestState::Running, Duration::from_millis(1)),
            WaitOutcome::Reached
        );
        assert_eq!(cell.current(), TestState::Done);
    }

    #[test]
    fn test_wait_does_not_consume() {
        let cell = StateCell::new(TestState::Idle);
        cell.publish(TestState::Done);
        for _ in 0..3 {
            assert_eq!(
                cell.wait_until(TestState::Done, Duration::from_millis(1)),
                WaitOutcome::Reached
            );
        }
    }

    #[test]
    fn test_wait_timeout() {
        let cell = StateCell::new(TestState::Idle);
        assert_eq!(
            cell.wait_until(TestState::Done, Duration::from_millis(10)),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wait_any_first_of_two() {
        let cell = StateCell::new(TestState::Idle);
        let waiter = {
            let cell = cell.clone();
            thread::spawn(move || {
                cell.wait_any(
                    TestState::Running.mask() | TestState::Done.mask(),
                    Duration::from_secs(5),
                )
            })
        };
        thread::sleep(Duration::from_millis(20));
        cell.publish(TestState::Done);
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Reached);
    }

    #[test]
    fn test_republish_current_is_noop() {
        let cell = StateCell::new(TestState::Idle);
        cell.publish(TestState::Running);
        let before = cell.current();
        cell.publish(TestState::Running);
        assert_eq!(cell.current(), before);
    }

    #[test]
    fn test_multiple_waiters_all_observe() {
        let cell = StateCell::new(TestState::Idle);
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.wait_until(TestState::Done, Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        cell.publish(TestState::Done);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), WaitOutcome::Reached);
        }
    }
}

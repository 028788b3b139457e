//! Per-subscription flow control.
//!
//! Two wait points, both condition-variable based: [`CreditGate`] for
//! receiver-driven credit, [`TailSignal`] for commit notification.
//! Closing either wakes any suspended producer, which makes teardown
//! safe to invoke concurrently with an in-progress wait.

use crate::types::Cursor;
use parking_lot::{Condvar, Mutex};

struct CreditState {
    /// Total credit ever granted.
    granted: u64,
    /// Entries sent against that credit. Invariant: `consumed <= granted`.
    consumed: u64,
    /// Cap on outstanding credit (`granted - consumed`).
    ceiling: u64,
    closed: bool,
}

/// Receiver-driven flow control.
///
/// The consumer grants credit; the producer consumes one unit per
/// delivered entry and suspends when none is available. Grants beyond
/// the ceiling are clamped, which bounds in-flight entries and with
/// them the delivery channel.
pub(crate) struct CreditGate {
    state: Mutex<CreditState>,
    cv: Condvar,
}

impl CreditGate {
    pub fn new(initial: u64, ceiling: u64) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            state: Mutex::new(CreditState {
                granted: initial.min(ceiling),
                consumed: 0,
                ceiling,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Add credit and wake a suspended producer.
    pub fn grant(&self, n: u64) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.granted = (state.granted + n).min(state.consumed + state.ceiling);
        self.cv.notify_all();
    }

    /// Block until one unit of credit is available, then consume it.
    ///
    /// Returns `false` if the gate was closed instead.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        while !state.closed && state.consumed >= state.granted {
            self.cv.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        state.consumed += 1;
        true
    }

    /// Wake any waiter and refuse all further credit traffic.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cv.notify_all();
    }

    /// `(granted, consumed)` as of now.
    #[cfg(test)]
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.granted, state.consumed)
    }
}

struct TailState {
    head: Cursor,
    closed: bool,
}

/// Latest committed cursor visible to one subscription.
///
/// The feed manager advances every live signal on each commit; the
/// producer waits here when it has caught up with the log.
pub(crate) struct TailSignal {
    state: Mutex<TailState>,
    cv: Condvar,
}

impl TailSignal {
    pub fn new(head: Cursor) -> Self {
        Self {
            state: Mutex::new(TailState {
                head,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Record a newly committed cursor and wake the producer.
    pub fn advance(&self, cursor: Cursor) {
        let mut state = self.state.lock();
        if cursor > state.head {
            state.head = cursor;
            self.cv.notify_all();
        }
    }

    /// Block until the committed head moves past `pos`.
    ///
    /// Returns the head seen, or `None` if the signal was closed.
    pub fn wait_past(&self, pos: Cursor) -> Option<Cursor> {
        let mut state = self.state.lock();
        while !state.closed && state.head <= pos {
            self.cv.wait(&mut state);
        }
        if state.closed {
            None
        } else {
            Some(state.head)
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

//! Consumer-side subscription handle.

use crate::error::Result;
use crate::feed::manager::FeedManager;
use crate::feed::producer::ProducerShared;
use crate::feed::types::{DropReason, FeedEvent, StreamState, SubscriptionId};
use crate::types::{Cursor, LogEntry};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// One subscription's stream of matching log entries.
///
/// The stream is lazy, infinite, and non-restartable: it never ends on
/// its own, only via [`cancel`](FeedHandle::cancel) (or dropping the
/// handle) or a fatal producer error. Each delivered entry grants one
/// unit of credit back to the producer while the stream is `Active`;
/// [`pause`](FeedHandle::pause) withholds grants, which stalls the
/// producer within the outstanding-credit window without any unbounded
/// buffering on either side.
pub struct FeedHandle {
    id: SubscriptionId,
    receiver: Receiver<FeedEvent>,
    shared: Arc<ProducerShared>,
    manager: Arc<FeedManager>,
    state: StreamState,
    /// Grants withheld while paused, issued on resume.
    owed: u64,
    /// Cursor of the last delivered entry (the watch start before any
    /// delivery). A higher layer persists this to resume after a
    /// channel loss.
    position: Cursor,
}

impl FeedHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: Receiver<FeedEvent>,
        shared: Arc<ProducerShared>,
        manager: Arc<FeedManager>,
        start: Cursor,
    ) -> Self {
        Self {
            id,
            receiver,
            shared,
            manager,
            state: StreamState::Active,
            owed: 0,
            position: start,
        }
    }

    /// Receive the next matching entry (blocking).
    ///
    /// Returns `None` once the stream is closed: by `cancel`, by the
    /// handle observing teardown, or after a fatal error has been
    /// yielded. An `Err` item means the subscription failed and some
    /// mutations may have been missed; the stream is closed afterwards.
    pub fn recv(&mut self) -> Option<Result<LogEntry>> {
        if self.state == StreamState::Closed {
            return None;
        }
        match self.receiver.recv() {
            Ok(event) => self.deliver(event),
            Err(_) => {
                self.state = StreamState::Closed;
                None
            }
        }
    }

    /// Receive with a timeout. `None` means no entry arrived in time
    /// (check [`state`](FeedHandle::state) to distinguish a closed
    /// stream from an idle one).
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Result<LogEntry>> {
        if self.state == StreamState::Closed {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => self.deliver(event),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                self.state = StreamState::Closed;
                None
            }
        }
    }

    /// Receive without blocking.
    pub fn try_recv(&mut self) -> Option<Result<LogEntry>> {
        if self.state == StreamState::Closed {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(event) => self.deliver(event),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.state = StreamState::Closed;
                None
            }
        }
    }

    fn deliver(&mut self, event: FeedEvent) -> Option<Result<LogEntry>> {
        match event {
            FeedEvent::Entry(entry) => {
                self.position = entry.cursor;
                if self.state == StreamState::Active {
                    self.shared.credit.grant(1);
                } else {
                    self.owed += 1;
                }
                Some(Ok(entry))
            }
            FeedEvent::Dropped(DropReason::Cancelled) => {
                self.state = StreamState::Closed;
                None
            }
            FeedEvent::Dropped(DropReason::Failed(e)) => {
                self.state = StreamState::Closed;
                Some(Err(e))
            }
        }
    }

    /// Stop granting credit. Entries already granted may still arrive
    /// and are delivered on `recv`; beyond those the producer stalls
    /// until [`resume`](FeedHandle::resume).
    pub fn pause(&mut self) {
        if self.state == StreamState::Active {
            self.state = StreamState::Paused;
        }
    }

    /// Resume granting credit, including grants owed for entries
    /// consumed while paused.
    pub fn resume(&mut self) {
        if self.state == StreamState::Paused {
            self.state = StreamState::Active;
            if self.owed > 0 {
                self.shared.credit.grant(self.owed);
                self.owed = 0;
            }
        }
    }

    /// Tear the subscription down. Buffered-but-undelivered entries are
    /// discarded; after this returns no further entries are observable.
    /// Idempotent, and safe concurrently with an in-progress delivery.
    pub fn cancel(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.manager.unsubscribe(self.id);
        while self.receiver.try_recv().is_ok() {}
    }

    /// Current stream state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Cursor of the last delivered entry (the watch start before any
    /// delivery).
    pub fn position(&self) -> Cursor {
        self.position
    }

    /// Subscription identifier, for logging and diagnostics.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Iterator for FeedHandle {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

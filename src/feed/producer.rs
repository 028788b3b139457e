//! Per-subscription producer loop.
//!
//! Each subscription is served by one producer running on its own
//! thread: read the log forward of the subscription's position, filter,
//! acquire one unit of credit per matching entry, deliver. The producer
//! suspends only while waiting for a new commit or for credit, and both
//! waits are broken by teardown.

use crate::error::FeedError;
use crate::feed::credit::{CreditGate, TailSignal};
use crate::feed::types::{DropReason, FeedEvent, SubscriptionId, WatchFilter};
use crate::mutations::MutationLog;
use crate::types::Cursor;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// State shared between one producer, its consumer handle, and the
/// feed manager.
pub(crate) struct ProducerShared {
    pub id: SubscriptionId,
    pub filter: WatchFilter,
    pub credit: CreditGate,
    pub tail: TailSignal,
    /// Last cursor this producer has processed (delivered or skipped).
    /// Compaction never crosses `position + 1`.
    position: AtomicU64,
}

impl ProducerShared {
    pub fn new(id: SubscriptionId, filter: WatchFilter, credit: CreditGate, start: Cursor) -> Self {
        Self {
            id,
            filter,
            credit,
            tail: TailSignal::new(start),
            position: AtomicU64::new(start.value()),
        }
    }

    pub fn position(&self) -> Cursor {
        Cursor::from_value(self.position.load(Ordering::Acquire))
    }

    fn set_position(&self, cursor: Cursor) {
        self.position.store(cursor.value(), Ordering::Release);
    }

    /// Wake both wait points and refuse further traffic.
    pub fn close(&self) {
        self.credit.close();
        self.tail.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tail.is_closed()
    }
}

/// Producer loop body. Runs until teardown, a fatal error, or the
/// consumer goes away; the subscription stream never ends on its own.
pub(crate) fn run(shared: Arc<ProducerShared>, log: Arc<MutationLog>, tx: Sender<FeedEvent>) {
    let mut pos = shared.position();
    tracing::debug!(id = ?shared.id, start = ?pos, "feed producer started");

    loop {
        // Suspend until the committed head moves past us.
        let head = match shared.tail.wait_past(pos) {
            Some(head) => head,
            None => return finish(&shared, &tx, DropReason::Cancelled),
        };

        while pos < head {
            let next = pos.next();
            let entry = match log.entry_at(next) {
                Ok(Some(entry)) => entry,
                // Commits signal only after the append is readable, so
                // a missing entry is an ordering breach: abort rather
                // than risk skipping it.
                Ok(None) => {
                    return fail(
                        &shared,
                        &tx,
                        FeedError::Corruption(format!("log entry {:?} missing below head", next)),
                    )
                }
                Err(e) => return fail(&shared, &tx, e),
            };

            pos = entry.cursor;
            shared.set_position(pos);

            if !shared.filter.matches(&entry) {
                continue;
            }

            // One unit of credit per delivered entry.
            if !shared.credit.acquire() {
                return finish(&shared, &tx, DropReason::Cancelled);
            }

            tracing::trace!(id = ?shared.id, cursor = ?entry.cursor, "delivering entry");
            match tx.try_send(FeedEvent::Entry(entry)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Credit bounds in-flight entries below the channel
                    // capacity; a full channel means the accounting broke.
                    return fail(
                        &shared,
                        &tx,
                        FeedError::Corruption("credit accounting invariant violated".into()),
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    return finish(&shared, &tx, DropReason::Cancelled);
                }
            }
        }
    }
}

fn finish(shared: &ProducerShared, tx: &Sender<FeedEvent>, reason: DropReason) {
    tracing::debug!(id = ?shared.id, ?reason, "feed producer stopped");
    shared.close();
    let _ = tx.try_send(FeedEvent::Dropped(reason));
}

fn fail(shared: &ProducerShared, tx: &Sender<FeedEvent>, error: FeedError) {
    tracing::warn!(id = ?shared.id, %error, "feed producer failed");
    shared.close();
    let _ = tx.try_send(FeedEvent::Dropped(DropReason::Failed(error)));
}

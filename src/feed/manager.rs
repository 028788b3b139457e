//! Feed manager: the registry of live subscriptions.

use crate::error::{FeedError, Result};
use crate::feed::consumer::FeedHandle;
use crate::feed::credit::CreditGate;
use crate::feed::producer::{self, ProducerShared};
use crate::feed::types::{SubscriptionId, WatchFilter};
use crate::mutations::MutationLog;
use crate::types::Cursor;
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Tracks every live subscription and fans commit notifications out to
/// their producers. One producer per subscription, no shared state
/// between subscriptions beyond the read-only log.
pub struct FeedManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<ProducerShared>>>,
    next_id: AtomicU64,
    /// Credit granted to a new subscription before its first grant.
    initial_credit: u64,
    /// Cap on outstanding credit; also sizes the delivery channel.
    max_credit: u64,
}

impl FeedManager {
    pub fn new(initial_credit: u64, max_credit: u64) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            initial_credit,
            max_credit: max_credit.max(1),
        }
    }

    /// Open a subscription reading forward of `start` (exclusive).
    ///
    /// Fails with `InvalidCursor` when `start` is past the log head and
    /// `CursorTooOld` when the first needed entry was compacted away.
    pub fn watch(
        self: &Arc<Self>,
        log: &Arc<MutationLog>,
        filter: WatchFilter,
        start: Cursor,
    ) -> Result<FeedHandle> {
        let head = log.head();
        if start > head {
            return Err(FeedError::InvalidCursor {
                requested: start,
                head,
            });
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let credit = CreditGate::new(self.initial_credit, self.max_credit);
        let shared = Arc::new(ProducerShared::new(id, filter, credit, start));

        // Register before the floor check so a concurrent compaction
        // either sees this subscription's position or has already
        // raised the floor for us to observe.
        self.subscriptions.write().insert(id, Arc::clone(&shared));

        let floor = log.oldest_retained();
        if start.next() < floor {
            self.subscriptions.write().remove(&id);
            return Err(FeedError::CursorTooOld(start, floor));
        }

        // Cover commits that landed while we were registering.
        shared.tail.advance(log.head());

        // One slot above the credit ceiling so the terminal drop marker
        // always fits.
        let (tx, rx) = bounded(self.max_credit as usize + 1);

        let spawn_result = thread::Builder::new()
            .name(format!("tablefeed-sub-{}", id.0))
            .spawn({
                let shared = Arc::clone(&shared);
                let log = Arc::clone(log);
                move || producer::run(shared, log, tx)
            });
        if let Err(e) = spawn_result {
            self.subscriptions.write().remove(&id);
            return Err(e.into());
        }

        tracing::debug!(?id, table = %shared.filter.table, ?start, "watch opened");
        Ok(FeedHandle::new(id, rx, shared, Arc::clone(self), start))
    }

    /// Notify every live subscription of a newly committed cursor.
    /// Prunes subscriptions whose producers have already stopped.
    pub fn on_commit(&self, cursor: Cursor) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, shared) in subs.iter() {
                if shared.is_closed() {
                    to_remove.push(*id);
                } else {
                    shared.tail.advance(cursor);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                subs.remove(&id);
            }
        }
    }

    /// Tear a subscription down. Idempotent; safe to call while its
    /// producer is mid-delivery.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(shared) = self.subscriptions.write().remove(&id) {
            shared.close();
            tracing::debug!(?id, "watch closed");
        }
    }

    /// Oldest position any live subscription still needs, as a clamp
    /// for compaction. `None` when there are no live subscriptions.
    pub fn min_live_position(&self) -> Option<Cursor> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| !s.is_closed())
            .map(|s| s.position())
            .min()
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

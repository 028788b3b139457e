//! Subscription types for the change feed.

use crate::error::FeedError;
use crate::types::LogEntry;
use std::fmt;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// What one subscription observes: a table, narrowed by key prefix.
#[derive(Clone, Debug)]
pub struct WatchFilter {
    pub table: String,
    /// Empty prefix matches every key in the table.
    pub key_prefix: Vec<u8>,
}

impl WatchFilter {
    pub fn new(table: impl Into<String>, key_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            table: table.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Whether `entry` belongs to this subscription's stream.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.table == self.table && entry.key.starts_with(&self.key_prefix)
    }
}

/// Why a subscription's stream ended.
#[derive(Debug)]
pub enum DropReason {
    /// Explicitly cancelled (or the consumer was dropped).
    Cancelled,
    /// The producer hit a fatal error; mutations may have been missed.
    Failed(FeedError),
}

/// One item on a subscription's delivery channel.
#[derive(Debug)]
pub(crate) enum FeedEvent {
    Entry(LogEntry),
    Dropped(DropReason),
}

/// Consumer-side stream state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Delivering entries and granting credit.
    Active,
    /// Delivering already-granted entries, granting nothing new.
    Paused,
    /// Terminal. No further entries are observable.
    Closed,
}

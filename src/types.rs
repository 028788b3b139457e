//! Core types for the change feed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque position in the mutation log.
///
/// Cursors are totally ordered by append order: for any two entries A
/// appended before B, `cursor(A) < cursor(B)`. A cursor is never reused
/// or reassigned. Clients may compare and persist cursors but cannot
/// interpret them; the inner representation is deliberately private so
/// the log storage can change without breaking the watch contract.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Cursor(u64);

impl Cursor {
    /// Position before the first entry ever appended. Watching from
    /// `ORIGIN` replays the entire retained log.
    pub const ORIGIN: Cursor = Cursor(0);

    /// The position immediately after this one.
    pub(crate) fn next(self) -> Self {
        Cursor(self.0 + 1)
    }

    pub(crate) fn value(self) -> u64 {
        self.0
    }

    pub(crate) fn from_value(v: u64) -> Self {
        Cursor(v)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

/// What kind of row change an entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A row was written (inserted or overwritten).
    Put,
    /// A row was deleted. Carries no value.
    Delete,
}

/// A single committed row change in the mutation log.
///
/// Immutable once appended. The log owns the canonical copy; producers
/// and consumers hold clones.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of this entry in the log.
    pub cursor: Cursor,

    /// Table the row belongs to.
    pub table: String,

    /// Row key.
    pub key: Vec<u8>,

    /// Put or Delete.
    pub kind: ChangeKind,

    /// Row value. Always present for `Put`, always absent for `Delete`.
    pub value: Option<Vec<u8>>,
}

impl LogEntry {
    /// Whether this entry records a deletion.
    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub table_count: usize,
    pub row_count: u64,
    pub entry_count: u64,
    pub log_bytes: u64,
    pub subscription_count: usize,
    pub head: Cursor,
    pub oldest_retained: Cursor,
}

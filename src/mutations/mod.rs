//! Mutation log implementation.
//!
//! Every committed row change is appended to a single file-backed log
//! with a cursor index for O(1) access by position. The log is the
//! ordering authority for the whole store: cursor order is append
//! order, across all tables.

mod index;
mod log;

pub use index::CursorIndex;
pub use log::{LogIterator, MutationLog};

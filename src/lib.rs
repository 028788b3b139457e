//! # Tablefeed
//!
//! An embeddable change-feed engine for a row-oriented key-value
//! store. Every committed row mutation is appended to a durable,
//! totally ordered mutation log; clients watch a table (optionally
//! narrowed by key prefix) from any retained cursor and receive
//! changes in commit order, with credit-based backpressure instead of
//! unbounded buffering.
//!
//! ## Core Concepts
//!
//! - **Mutation Log**: append-only record of every committed change
//! - **Cursor**: opaque, totally ordered log position
//! - **Watch**: one subscription's filtered, ordered entry stream
//! - **Credit**: one unit per in-flight entry; pausing a consumer
//!   stalls its producer instead of piling entries up
//!
//! ## Example
//!
//! ```ignore
//! use tablefeed::{Cursor, FeedStore, StoreConfig};
//!
//! let store = FeedStore::open_or_create(StoreConfig {
//!     path: "./my-feed".into(),
//!     ..Default::default()
//! })?;
//!
//! store.create_table("users")?;
//!
//! // Watch everything from now on.
//! let mut feed = store.watch("users", b"", store.current_cursor())?;
//!
//! store.put("users", b"row1", b"alice")?;
//!
//! let entry = feed.recv().unwrap()?;
//! assert_eq!(entry.key, b"row1");
//! ```

pub mod error;
pub mod feed;
pub mod mutations;
pub mod store;
pub mod types;
pub mod wire;

// Re-exports
pub use error::{FeedError, Result};
pub use feed::{DropReason, FeedHandle, FeedManager, StreamState, SubscriptionId, WatchFilter};
pub use mutations::{LogIterator, MutationLog};
pub use store::{FeedStore, StoreConfig};
pub use types::{ChangeKind, Cursor, LogEntry, StoreStats};
pub use wire::{Control, Frame};

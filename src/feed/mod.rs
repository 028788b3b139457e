//! Change-feed system: ordered, backpressured watch streams.
//!
//! Every committed row change lands in the mutation log; a watch opens
//! a subscription that replays the log forward of a cursor, filtered by
//! table and key prefix, and then follows the live tail. Delivery is
//! credit-based: the consumer grants one unit per consumed entry, so a
//! paused consumer stalls its producer within the outstanding-credit
//! window instead of buffering without bound.
//!
//! # Example
//!
//! ```ignore
//! let mut feed = store.watch("users", b"row", Cursor::ORIGIN)?;
//!
//! while let Some(entry) = feed.recv() {
//!     let entry = entry?;
//!     match entry.kind {
//!         ChangeKind::Put => apply(&entry.key, entry.value.as_deref()),
//!         ChangeKind::Delete => remove(&entry.key),
//!     }
//! }
//! ```

mod consumer;
mod credit;
mod manager;
mod producer;
mod types;

pub use consumer::FeedHandle;
pub use manager::FeedManager;
pub use types::{DropReason, StreamState, SubscriptionId, WatchFilter};

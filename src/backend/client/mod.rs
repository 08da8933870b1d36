//! Client-side collaboration plumbing: the durable offline queue, the
//! throttling/ack-aware sync queue built on top of it, and the local
//! cache that overlays unacknowledged edits on the last known snapshot.

pub mod cache;
pub mod durable_queue;
pub mod sync_queue;

pub use cache::LocalCache;
pub use durable_queue::{DurableQueue, FileDurableQueue, InMemoryDurableQueue, PendingEvent};
pub use sync_queue::SyncQueue;

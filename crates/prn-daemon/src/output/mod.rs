//! Append-only output capture.
//!
//! An [`OutputStore`] records every byte a child process writes to one of its
//! output streams and replays the full sequence to any number of subscribers,
//! no matter when they attach. The embedded [`Broadcaster`] is only a
//! "recheck now" signal; the authoritative data lives in the store's list.

mod broadcaster;
mod store;

pub use broadcaster::{Broadcaster, BroadcasterStopped, Subscription};
pub use store::{OutputStore, StoreWriter};

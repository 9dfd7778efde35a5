//! Append-only byte log with replay-from-start subscriptions.
//!
//! The store is a singly-linked list of immutable chunks behind a sentinel
//! head. Linking a node uses release ordering and readers load `next` with
//! acquire ordering (both provided by [`OnceLock`]), so a subscriber woken by
//! the broadcaster always sees every node linked before the wake-up.
//! Appending goes through a [`StoreWriter`], which owns the tail cursor: the
//! single-writer discipline is enforced by the type rather than a lock.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::broadcaster::{Broadcaster, Subscription};

struct Node {
    data: Bytes,
    next: OnceLock<Arc<Node>>,
}

struct Inner {
    /// Sentinel head; never carries data.
    head: Arc<Node>,
    broadcaster: Broadcaster<()>,
}

/// Shared, append-only log of byte chunks.
///
/// Cheap to clone; all clones view the same log.
#[derive(Clone)]
pub struct OutputStore {
    inner: Arc<Inner>,
}

/// Exclusive append handle for one [`OutputStore`].
pub struct StoreWriter {
    inner: Arc<Inner>,
    tail: Arc<Node>,
}

impl OutputStore {
    /// Creates an empty store and its writer.
    ///
    /// Must be called from within a tokio runtime (the embedded broadcaster
    /// spawns its dispatcher task).
    pub fn new() -> (Self, StoreWriter) {
        let head = Arc::new(Node {
            data: Bytes::new(),
            next: OnceLock::new(),
        });
        let inner = Arc::new(Inner {
            head: Arc::clone(&head),
            broadcaster: Broadcaster::new(),
        });
        let store = Self {
            inner: Arc::clone(&inner),
        };
        (store, StoreWriter { inner, tail: head })
    }

    /// Marks the store closed: no more chunks will ever be appended, and
    /// every current and future subscriber channel closes once drained.
    ///
    /// The supervisor calls this only after the child has been reaped and
    /// both pump tasks have finished, so no append can follow a stop.
    pub fn stop(&self) {
        self.inner.broadcaster.stop();
    }

    /// Returns a channel delivering every chunk ever appended, in insertion
    /// order, starting from the first. The channel closes after the final
    /// chunk has been delivered and the store has been stopped.
    ///
    /// Backpressure applies to the subscriber alone: a slow receiver stalls
    /// its own replay task, never the writer or other subscribers. Dropping
    /// the receiver ends the replay.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let inner = Arc::clone(&self.inner);
        match inner.broadcaster.subscribe() {
            Ok(sub) => {
                tokio::spawn(stream_live(inner, sub, tx));
            }
            Err(_stopped) => {
                // The process already terminated: replay the frozen log.
                tokio::spawn(stream_finished(inner, tx));
            }
        }
        rx
    }

    /// Visits every stored chunk in insertion order until `visit` returns
    /// `false`. Best-effort snapshot; concurrent appends may or may not be
    /// observed.
    pub fn for_each(&self, mut visit: impl FnMut(&Bytes) -> bool) {
        let mut cursor = Arc::clone(&self.inner.head);
        while let Some(node) = cursor.next.get().cloned() {
            cursor = node;
            if !visit(&cursor.data) {
                return;
            }
        }
    }

    /// Concatenates every stored chunk.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.for_each(|chunk| {
            out.extend_from_slice(chunk);
            true
        });
        out
    }
}

impl StoreWriter {
    /// Appends an owned chunk to the log and wakes subscribers.
    ///
    /// The node is linked before the broadcaster token is published, so a
    /// subscriber woken by the token (or by the broadcaster closing) always
    /// finds the chunk in the list.
    pub fn append(&mut self, data: Bytes) {
        let node = Arc::new(Node {
            data,
            next: OnceLock::new(),
        });
        // This writer is the only task that links nodes, so the slot is free.
        let _ = self.tail.next.set(Arc::clone(&node));
        self.tail = node;
        self.inner.broadcaster.publish(());
    }

    /// Copying write sink.
    ///
    /// The pipe pump reuses its read buffer across reads, so the chunk must
    /// be copied before it is retained. Empty writes are dropped.
    pub fn write(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        self.append(Bytes::copy_from_slice(buf));
    }
}

async fn stream_live(inner: Arc<Inner>, mut sub: Subscription<()>, tx: mpsc::Sender<Bytes>) {
    let mut cursor = Arc::clone(&inner.head);
    loop {
        if let Some(node) = cursor.next.get().cloned() {
            cursor = node;
            if tx.send(cursor.data.clone()).await.is_err() {
                // Receiver dropped (e.g. cancelled stream); abandon replay.
                return;
            }
            continue;
        }

        if sub.recv().await.is_none() {
            // Store stopped. Chunks appended just before the stop may not
            // have been walked yet; drain them before closing.
            drain_from(cursor, tx).await;
            return;
        }
    }
}

async fn stream_finished(inner: Arc<Inner>, tx: mpsc::Sender<Bytes>) {
    drain_from(Arc::clone(&inner.head), tx).await;
}

/// Sends every chunk after `cursor`, then drops the sender, closing the
/// channel.
async fn drain_from(mut cursor: Arc<Node>, tx: mpsc::Sender<Bytes>) {
    while let Some(node) = cursor.next.get().cloned() {
        cursor = node;
        if tx.send(cursor.data.clone()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn empty_store_has_no_chunks() {
        let (store, _writer) = OutputStore::new();
        let mut count = 0;
        store.for_each(|_| {
            count += 1;
            true
        });
        assert_eq!(count, 0);
        assert!(store.bytes().is_empty());
        store.stop();
    }

    #[tokio::test]
    async fn for_each_order_and_early_stop() {
        let (store, mut writer) = OutputStore::new();
        writer.append(Bytes::from_static(b"a"));
        writer.append(Bytes::from_static(b"b"));
        writer.append(Bytes::from_static(b"c"));

        let mut seen = Vec::new();
        store.for_each(|chunk| {
            seen.push(chunk.clone());
            true
        });
        assert_eq!(seen, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")]);

        let mut calls = 0;
        store.for_each(|_| {
            calls += 1;
            calls < 2
        });
        assert_eq!(calls, 2);

        assert_eq!(store.bytes(), b"abc");
        store.stop();
    }

    #[tokio::test]
    async fn subscriber_gets_existing_chunks_in_order() {
        let (store, mut writer) = OutputStore::new();
        writer.append(Bytes::from_static(b"a"));
        writer.append(Bytes::from_static(b"b"));

        let mut rx = store.subscribe(2);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));

        // Nothing more until an append happens.
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        writer.append(Bytes::from_static(b"c"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"c"));

        store.stop();
    }

    #[tokio::test]
    async fn channel_closes_after_stop() {
        let (store, mut writer) = OutputStore::new();
        writer.append(Bytes::from_static(b"x"));

        let mut rx = store.subscribe(1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"x"));

        store.stop();
        let closed = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("channel did not close after stop");
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn subscriber_after_stop_replays_full_log() {
        let (store, mut writer) = OutputStore::new();
        writer.append(Bytes::from_static(b"1"));
        writer.append(Bytes::from_static(b"2"));
        store.stop();

        // Give the broadcaster time to reject new subscriptions.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rx = store.subscribe(1);
        assert_eq!(collect(rx).await, b"12");
    }

    #[tokio::test]
    async fn subscribers_before_and_after_stop_see_identical_bytes() {
        let (store, mut writer) = OutputStore::new();
        let early = store.subscribe(1);
        writer.append(Bytes::from_static(b"alpha"));
        writer.append(Bytes::from_static(b"beta"));
        store.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let late = store.subscribe(1);

        assert_eq!(collect(early).await, b"alphabeta");
        assert_eq!(collect(late).await, b"alphabeta");
    }

    #[tokio::test]
    async fn concurrent_subscribers_while_appending() {
        const CHUNKS: usize = 300;
        const SUBSCRIBERS: usize = 10;

        let (store, mut writer) = OutputStore::new();

        let mut expected = Vec::new();
        for i in 1..=CHUNKS {
            expected.extend_from_slice(format!("{i}\n").as_bytes());
        }

        let mut readers = Vec::new();
        for _ in 0..SUBSCRIBERS {
            let rx = store.subscribe(32);
            readers.push(tokio::spawn(collect(rx)));
        }

        let appender = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 1..=CHUNKS {
                    writer.append(Bytes::from(format!("{i}\n")));
                    tokio::time::sleep(Duration::from_micros(200)).await;
                }
                store.stop();
            })
        };

        appender.await.unwrap();
        for reader in readers {
            let bytes = timeout(Duration::from_secs(3), reader)
                .await
                .expect("subscriber did not finish")
                .unwrap();
            assert_eq!(bytes, expected);
        }
    }
}

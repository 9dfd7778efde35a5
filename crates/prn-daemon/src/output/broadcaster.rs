//! Level-triggered, lossy fan-out.
//!
//! A [`Broadcaster`] lets publishers push a "something changed" token to an
//! arbitrary set of subscribers without ever blocking on a slow one. It is
//! not a durable queue: the inbox holds at most one pending token (publishing
//! over it displaces the older token), and each subscriber holds a
//! latest-value slot, so a subscriber that lags simply coalesces tokens. The
//! guarantee is that a subscriber eventually observes a token no older than
//! any token published after it subscribed, as long as the broadcaster stays
//! open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// Error returned by [`Broadcaster::subscribe`] after [`Broadcaster::stop`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("failed to subscribe: broadcaster is stopped")]
pub struct BroadcasterStopped;

/// Level-triggered fan-out of tokens of type `T`.
///
/// Dropping the broadcaster without calling [`stop`](Self::stop) leaves the
/// dispatcher task parked; the supervisor always stops stores when a child is
/// reaped.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    /// Capacity-1 inbox; publishing over a pending token displaces it.
    inbox: Mutex<Inbox<T>>,
    wakeup: Notify,
    subscribers: Mutex<SubscriberSet<T>>,
    next_id: AtomicU64,
}

struct Inbox<T> {
    pending: Option<T>,
    closed: bool,
}

struct SubscriberSet<T> {
    slots: HashMap<u64, Arc<watch::Sender<Option<T>>>>,
    stopped: bool,
}

/// A live subscription to a [`Broadcaster`].
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    id: u64,
    rx: watch::Receiver<Option<T>>,
    shared: Weak<Shared<T>>,
}

impl<T: Clone + Send + Sync + 'static> Broadcaster<T> {
    /// Creates a broadcaster and spawns its dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                pending: None,
                closed: false,
            }),
            wakeup: Notify::new(),
            subscribers: Mutex::new(SubscriberSet {
                slots: HashMap::new(),
                stopped: false,
            }),
            next_id: AtomicU64::new(0),
        });
        tokio::spawn(dispatch(Arc::clone(&shared)));
        Self { shared }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Broadcaster<T> {
    /// Publishes a token. Never blocks; a token still sitting in the inbox is
    /// displaced by the new one.
    pub fn publish(&self, msg: T) {
        let mut inbox = lock(&self.shared.inbox);
        if inbox.closed {
            return;
        }
        inbox.pending = Some(msg);
        drop(inbox);
        self.shared.wakeup.notify_one();
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Result<Subscription<T>, BroadcasterStopped> {
        let mut set = lock(&self.shared.subscribers);
        if set.stopped {
            return Err(BroadcasterStopped);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        set.slots.insert(id, Arc::new(tx));
        Ok(Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Stops the broadcaster: any pending token is still delivered, then
    /// every subscription closes exactly once and later `subscribe` calls
    /// fail. Idempotent.
    pub fn stop(&self) {
        lock(&self.shared.inbox).closed = true;
        self.shared.wakeup.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).slots.len()
    }
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next token.
    ///
    /// Returns `None` once the broadcaster has stopped and no token is
    /// pending in this subscription's slot.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(msg) = self.rx.borrow_and_update().clone() {
                return Some(msg);
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).slots.remove(&self.id);
        }
    }
}

async fn dispatch<T: Clone + Send + Sync + 'static>(shared: Arc<Shared<T>>) {
    loop {
        let (msg, closed) = {
            let mut inbox = lock(&shared.inbox);
            (inbox.pending.take(), inbox.closed)
        };

        if let Some(msg) = msg {
            // Snapshot under the mutex, deliver outside it. A full slot is
            // displaced, so a slow subscriber never blocks the dispatcher.
            let slots: Vec<_> = lock(&shared.subscribers).slots.values().cloned().collect();
            for slot in slots {
                slot.send_replace(Some(msg.clone()));
            }
            continue;
        }

        if closed {
            let mut set = lock(&shared.subscribers);
            set.stopped = true;
            // Dropping the senders closes every subscription.
            set.slots.clear();
            debug!("broadcaster stopped");
            return;
        }

        shared.wakeup.notified().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn recv_with_timeout<T: Clone>(sub: &mut Subscription<T>) -> Option<T> {
        timeout(Duration::from_millis(200), sub.recv())
            .await
            .expect("timed out waiting for token")
    }

    #[tokio::test]
    async fn single_subscriber_receives() {
        let b = Broadcaster::new();
        let mut sub = b.subscribe().unwrap();

        b.publish("hello");
        assert_eq!(recv_with_timeout(&mut sub).await, Some("hello"));

        b.stop();
    }

    #[tokio::test]
    async fn multiple_subscribers_receive() {
        let b = Broadcaster::new();
        let mut first = b.subscribe().unwrap();

        b.publish(1);
        assert_eq!(recv_with_timeout(&mut first).await, Some(1));

        let mut second = b.subscribe().unwrap();
        b.publish(2);

        assert_eq!(recv_with_timeout(&mut first).await, Some(2));
        assert_eq!(recv_with_timeout(&mut second).await, Some(2));

        b.stop();
    }

    #[tokio::test]
    async fn slow_subscriber_sees_latest() {
        let b = Broadcaster::new();
        let mut sub = b.subscribe().unwrap();

        // Published without an intervening recv: the older token is
        // displaced, the latest one survives.
        b.publish(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        b.publish(2);

        assert_eq!(recv_with_timeout(&mut sub).await, Some(2));

        b.stop();
    }

    #[tokio::test]
    async fn stop_closes_subscribers() {
        let b: Broadcaster<()> = Broadcaster::new();
        let mut sub = b.subscribe().unwrap();

        b.stop();
        let closed = timeout(Duration::from_millis(500), sub.recv())
            .await
            .expect("subscription did not close after stop");
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn pending_token_delivered_before_close() {
        let b = Broadcaster::new();
        let mut sub = b.subscribe().unwrap();

        b.publish(7);
        b.stop();

        // The dispatcher drains the pending token before it observes the
        // close, so the token survives the stop.
        let first = timeout(Duration::from_millis(500), sub.recv()).await.unwrap();
        assert_eq!(first, Some(7));
        let next = timeout(Duration::from_millis(500), sub.recv()).await.unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn subscribe_after_stop_fails() {
        let b: Broadcaster<()> = Broadcaster::new();
        b.stop();

        // The dispatcher marks the set stopped asynchronously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(b.subscribe().err(), Some(BroadcasterStopped));
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let b: Broadcaster<()> = Broadcaster::new();
        let sub = b.subscribe().unwrap();
        let _other = b.subscribe().unwrap();
        assert_eq!(b.subscriber_count(), 2);

        drop(sub);
        assert_eq!(b.subscriber_count(), 1);

        b.stop();
    }
}

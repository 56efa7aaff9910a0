//! Replication of bus messages to live feed subscribers.
//!
//! Each subscriber owns a bounded queue. [`Fanout::publish`] snapshots the
//! subscriber set under the lock and writes outside it, so subscribing and
//! unsubscribing never race with delivery. Writes never wait: a full queue
//! skips the message for that subscriber only, and a closed queue removes
//! the subscriber and fires its done signal.

use crate::server::telemetry::{
    decrement_subscribers, increment_subscriber_lag, increment_subscribers,
};
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::Stream;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use scooter_core::types::TelemetryMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

pub type SubscriberId = u64;

#[derive(Debug)]
struct SubscriberHandle {
    tx: mpsc::Sender<Arc<TelemetryMessage>>,
    done: CancellationToken,
}

#[derive(Debug, Default)]
struct Subscribers {
    live: HashMap<SubscriberId, SubscriberHandle>,
    /// Set by [`Fanout::close_all`]; later subscriptions start ended.
    closed: bool,
}

#[derive(Debug)]
struct FanoutInner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
    capacity: usize,
    lagged: AtomicU64,
}

/// Cloneable handle to the subscriber set.
#[derive(Debug, Clone)]
pub struct Fanout {
    inner: Arc<FanoutInner>,
}

impl Fanout {
    /// Creates an empty set whose subscribers each buffer up to `capacity`
    /// messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                subscribers: Mutex::new(Subscribers::default()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                lagged: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let done = CancellationToken::new();

        {
            let mut subscribers = self.inner.subscribers.lock();
            if subscribers.closed {
                // The stream ends as soon as it is polled.
                drop(tx);
                done.cancel();
                tracing::debug!(subscriber = id, "Live feed closed, subscription refused");
            } else {
                subscribers.live.insert(
                    id,
                    SubscriberHandle {
                        tx,
                        done: done.clone(),
                    },
                );
                increment_subscribers();
                tracing::info!(subscriber = id, "Live feed subscriber connected");
            }
        }

        Subscription {
            id,
            rx,
            done,
            fanout: self.clone(),
        }
    }

    /// Removes `id` and fires its done signal. Returns whether it was
    /// present.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.lock().live.remove(&id);
        match removed {
            Some(handle) => {
                handle.done.cancel();
                decrement_subscribers();
                tracing::info!(subscriber = id, "Live feed subscriber disconnected");
                true
            }
            None => false,
        }
    }

    /// Offers `msg` to every live subscriber and returns how many accepted
    /// it.
    pub fn publish(&self, msg: Arc<TelemetryMessage>) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Arc<TelemetryMessage>>)> = self
            .inner
            .subscribers
            .lock()
            .live
            .iter()
            .map(|(id, handle)| (*id, handle.tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in snapshot {
            match tx.try_send(Arc::clone(&msg)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.lagged.fetch_add(1, Ordering::Relaxed);
                    increment_subscriber_lag();
                    tracing::trace!(subscriber = id, "Subscriber queue full, message skipped");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }

        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.subscribers.lock().live.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages skipped because a subscriber's queue was full.
    pub fn lagged(&self) -> u64 {
        self.inner.lagged.load(Ordering::Relaxed)
    }

    /// Ends every subscription and refuses new ones. Open streams finish
    /// once drained.
    pub fn close_all(&self) {
        let drained: Vec<(SubscriberId, SubscriberHandle)> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.closed = true;
            subscribers.live.drain().collect()
        };

        for (_id, handle) in drained {
            handle.done.cancel();
            decrement_subscribers();
        }
    }
}

/// A live feed subscription.
///
/// Yields every message published after it was created, as a [`Stream`].
/// Dropping it unsubscribes, which ties the subscription to the lifetime of
/// the connection that holds it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<TelemetryMessage>>,
    done: CancellationToken,
    fanout: Fanout,
}

impl Subscription {
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Fired when the fanout removes this subscriber.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<Arc<TelemetryMessage>> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Arc<TelemetryMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.unsubscribe(self.id);
    }
}

//! Cancelable snapshot subscriptions.
//!
//! A `Publisher` pushes immutable snapshots; every `Subscription` observes the
//! latest one. Cancellation is ownership-based: when the last subscription is
//! dropped the publisher reports closed, which is how long-running producers
//! (poll loops, watchers) know to stop. Each delivered snapshot is a complete,
//! consistent view of its scope; deliveries from independent subscriptions are
//! unordered relative to each other.

use futures_util::Stream;
use tokio::sync::watch;

/// Producer half: publishes snapshots to all live subscriptions.
pub struct Publisher<T> {
    tx: watch::Sender<T>,
}

/// Consumer half: a live handle on the latest snapshot. Dropping it releases
/// the subscription.
pub struct Subscription<T> {
    rx: watch::Receiver<T>,
}

/// Create a publisher/subscription pair seeded with `initial`.
pub fn channel<T>(initial: T) -> (Publisher<T>, Subscription<T>) {
    let (tx, rx) = watch::channel(initial);
    (Publisher { tx }, Subscription { rx })
}

impl<T> Publisher<T> {
    /// Replace the current snapshot and wake all subscriptions.
    pub fn publish(&self, snapshot: T) {
        self.tx.send_replace(snapshot);
    }

    /// Hand out another subscription to the same snapshots.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// True once every subscription has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when every subscription has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl<T: Clone> Subscription<T> {
    /// Clone of the most recently published snapshot.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns false when the publisher is gone
    /// and no further snapshots will arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Adapt into a stream of snapshots, one item per publish, ending when
    /// the publisher is dropped.
    pub fn updates(self) -> impl Stream<Item = T>
    where
        T: Send + Sync + 'static,
    {
        futures_util::stream::unfold(self, |mut sub| async move {
            if sub.changed().await {
                let snapshot = sub.latest();
                Some((snapshot, sub))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn latest_tracks_publishes() {
        let (publisher, sub) = channel(0);
        assert_eq!(sub.latest(), 0);
        publisher.publish(7);
        assert_eq!(sub.latest(), 7);
    }

    #[tokio::test]
    async fn changed_wakes_on_publish_and_ends_on_publisher_drop() {
        let (publisher, mut sub) = channel(0);
        publisher.publish(1);
        assert!(sub.changed().await);
        assert_eq!(sub.latest(), 1);
        drop(publisher);
        assert!(!sub.changed().await);
    }

    #[tokio::test]
    async fn dropping_every_subscription_closes_the_publisher() {
        let (publisher, sub) = channel(0);
        let extra = publisher.subscribe();
        assert!(!publisher.is_closed());
        drop(sub);
        assert!(!publisher.is_closed());
        drop(extra);
        assert!(publisher.is_closed());
    }

    #[tokio::test]
    async fn updates_yields_each_publish() {
        let (publisher, sub) = channel(0);
        let mut stream = Box::pin(sub.updates());
        publisher.publish(1);
        assert_eq!(stream.next().await, Some(1));
        publisher.publish(2);
        assert_eq!(stream.next().await, Some(2));
        drop(publisher);
        assert_eq!(stream.next().await, None);
    }
}

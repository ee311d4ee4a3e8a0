//! Reference-counted feed subscriptions
//!
//! Broadcast feeds (the event bus, console streams) cost the server work
//! while enabled, so they are switched on when the first local subscriber
//! arrives and off when the last one leaves. [`Subscription::acquire`]
//! returns a [`SubscriptionGuard`] that acts as the release token.
//!
//! Holder counts change under one lock per feed, so enable and disable are
//! issued exactly once per 0↔1 edge no matter how joins and leaves
//! interleave. Joining and releasing both run on detached tasks, so enable
//! and disable stay paired even when the caller is cancelled halfway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use corral_core::{ConnectionError, CorralError, DomainError};

/// Remote switch for a broadcast feed
#[async_trait]
pub trait FeedControl: Send + Sync + 'static {
    /// Ask the server to start publishing the feed
    async fn enable(&self) -> Result<(), CorralError>;

    /// Ask the server to stop publishing the feed
    async fn disable(&self) -> Result<(), CorralError>;
}

/// What a subscriber observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem<T> {
    /// The next item
    Item(T),
    /// The subscriber fell behind and this many items were skipped
    Lagged(u64),
}

struct Shared<T> {
    label: String,
    feed: broadcast::Sender<T>,
    holders: Mutex<usize>,
    holder_count: AtomicUsize,
    control: Box<dyn FeedControl>,
    closed: CancellationToken,
}

/// A broadcast feed with lazy remote enable/disable
pub struct Subscription<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Create a feed buffering up to `capacity` items per subscriber.
    ///
    /// Subscribers observe closure once `closed` is cancelled.
    pub fn new(
        label: impl Into<String>,
        capacity: usize,
        control: impl FeedControl,
        closed: CancellationToken,
    ) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                feed,
                holders: Mutex::new(0),
                holder_count: AtomicUsize::new(0),
                control: Box::new(control),
                closed,
            }),
        }
    }

    /// Register interest, enabling the remote feed on the first holder.
    ///
    /// The returned guard sees every item published from this call on. The
    /// join runs on a detached task: a caller cancelled while the feed is
    /// being enabled leaves behind a holder that is released right away.
    pub async fn acquire(&self) -> Result<SubscriptionGuard<T>, CorralError> {
        let (reply, joined) = oneshot::channel();
        tokio::spawn(join(Arc::clone(&self.shared), reply));
        joined
            .await
            .unwrap_or_else(|_| Err(ConnectionError::Closed.into()))
    }

    /// Deliver an item to every current subscriber, returning how many got it
    pub fn publish(&self, item: T) -> usize {
        self.shared.feed.send(item).unwrap_or(0)
    }

    /// Number of guards currently held
    pub fn holders(&self) -> usize {
        self.shared.holder_count.load(Ordering::SeqCst)
    }

    /// Whether nothing but this handle refers to the feed: no guard, no
    /// pending join and no release still running
    pub fn is_idle(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }

    /// Feed label used in logs
    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

type JoinReply<T> = oneshot::Sender<Result<SubscriptionGuard<T>, CorralError>>;

async fn join<T: Clone + Send + 'static>(shared: Arc<Shared<T>>, reply: JoinReply<T>) {
    let mut holders = shared.holders.lock().await;
    // Subscribed before enabling so items sent right after the ack are kept.
    let receiver = shared.feed.subscribe();

    if *holders == 0 {
        match shared.control.enable().await {
            Ok(()) => tracing::debug!(feed = %shared.label, "Feed enabled"),
            Err(CorralError::Domain(DomainError::AlreadyInState(_))) => {
                tracing::debug!(feed = %shared.label, "Feed was already enabled")
            }
            Err(e) => {
                drop(holders);
                let _ = reply.send(Err(e));
                return;
            }
        }
    }

    *holders += 1;
    shared.holder_count.store(*holders, Ordering::SeqCst);
    drop(holders);

    let guard = SubscriptionGuard {
        receiver,
        closed: shared.closed.clone(),
        shared: Some(Arc::clone(&shared)),
    };
    if let Err(Ok(guard)) = reply.send(Ok(guard)) {
        tracing::debug!(feed = %shared.label, "Subscriber left while joining");
        guard.release().await;
    }
}

async fn release<T: Send + 'static>(shared: Arc<Shared<T>>) {
    let mut holders = shared.holders.lock().await;
    *holders = holders.saturating_sub(1);
    shared.holder_count.store(*holders, Ordering::SeqCst);

    if *holders > 0 {
        return;
    }

    match shared.control.disable().await {
        Ok(()) => tracing::debug!(feed = %shared.label, "Feed disabled"),
        Err(e) if e.is_closed() || shared.closed.is_cancelled() => {
            tracing::debug!(feed = %shared.label, "Feed not disabled, connection closed")
        }
        Err(CorralError::Domain(DomainError::AlreadyInState(_))) => {
            tracing::debug!(feed = %shared.label, "Feed was already disabled")
        }
        Err(e) => tracing::warn!(feed = %shared.label, "Failed to disable feed: {}", e),
    }
}

/// One subscriber's cursor over a feed; dropping it releases the holder
pub struct SubscriptionGuard<T: Send + 'static> {
    receiver: broadcast::Receiver<T>,
    closed: CancellationToken,
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Clone + Send + 'static> SubscriptionGuard<T> {
    /// Next item or lag notice; None once the connection is closed
    pub async fn recv(&mut self) -> Option<FeedItem<T>> {
        if self.closed.is_cancelled() {
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return None,
            next = self.receiver.recv() => next,
        };

        match next {
            Ok(item) => Some(FeedItem::Item(item)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(FeedItem::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Next item, skipping over lag notices
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.recv().await? {
                FeedItem::Item(item) => return Some(item),
                FeedItem::Lagged(skipped) => {
                    tracing::warn!(skipped, "Subscriber lagged behind feed");
                }
            }
        }
    }

    /// Release the holder and wait until any resulting disable has finished
    pub async fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            if let Err(e) = tokio::spawn(release(shared)).await {
                tracing::warn!("Feed release task failed: {}", e);
            }
        }
    }
}

impl<T: Send + 'static> Drop for SubscriptionGuard<T> {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release(shared));
            }
            Err(_) => tracing::warn!(
                feed = %shared.label,
                "Subscription dropped outside a runtime, feed left enabled"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        enabled: AtomicUsize,
        disabled: AtomicUsize,
    }

    struct CountingControl {
        counters: Arc<Counters>,
        delay: Duration,
        fail_enable: bool,
    }

    #[async_trait]
    impl FeedControl for CountingControl {
        async fn enable(&self) -> Result<(), CorralError> {
            tokio::time::sleep(self.delay).await;
            if self.fail_enable {
                return Err(DomainError::AccessDenied("no listen".to_string()).into());
            }
            self.counters.enabled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disable(&self) -> Result<(), CorralError> {
            tokio::time::sleep(self.delay).await;
            self.counters.disabled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn feed(delay: Duration) -> (Subscription<u32>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let control = CountingControl {
            counters: Arc::clone(&counters),
            delay,
            fail_enable: false,
        };
        (
            Subscription::new("test", 16, control, CancellationToken::new()),
            counters,
        )
    }

    async fn wait_for_disable(counters: &Counters, expected: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while counters.disabled.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("feed never disabled");
    }

    #[tokio::test]
    async fn test_sequential_acquire_release_toggles_once() {
        let (subscription, counters) = feed(Duration::ZERO);

        let mut guards = Vec::new();
        for _ in 0..5 {
            guards.push(subscription.acquire().await.unwrap());
        }
        assert_eq!(subscription.holders(), 5);
        assert_eq!(counters.enabled.load(Ordering::SeqCst), 1);

        for guard in guards {
            guard.release().await;
        }
        assert_eq!(subscription.holders(), 0);
        assert_eq!(counters.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(counters.disabled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_release_toggles_once() {
        let (subscription, counters) = feed(Duration::from_millis(2));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let subscription = subscription.clone();
                tokio::spawn(async move {
                    let guard = subscription.acquire().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(i % 4)).await;
                    guard
                })
            })
            .collect();

        let mut guards = Vec::new();
        for task in tasks {
            guards.push(task.await.unwrap());
        }
        assert_eq!(counters.enabled.load(Ordering::SeqCst), 1);

        let releases: Vec<_> = guards
            .into_iter()
            .map(|guard| tokio::spawn(guard.release()))
            .collect();
        for release in releases {
            release.await.unwrap();
        }

        assert_eq!(subscription.holders(), 0);
        assert_eq!(counters.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(counters.disabled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejoin_after_last_leave_enables_again() {
        let (subscription, counters) = feed(Duration::ZERO);

        subscription.acquire().await.unwrap().release().await;
        subscription.acquire().await.unwrap().release().await;

        assert_eq!(counters.enabled.load(Ordering::SeqCst), 2);
        assert_eq!(counters.disabled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_only_later_items() {
        let (subscription, _counters) = feed(Duration::ZERO);

        let mut early = subscription.acquire().await.unwrap();
        subscription.publish(1);
        let mut late = subscription.acquire().await.unwrap();
        subscription.publish(2);

        assert_eq!(early.next().await, Some(1));
        assert_eq!(early.next().await, Some(2));
        assert_eq!(late.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let (subscription, counters) = feed(Duration::ZERO);

        let guard = subscription.acquire().await.unwrap();
        drop(guard);

        wait_for_disable(&counters, 1).await;
        assert_eq!(subscription.holders(), 0);
    }

    #[tokio::test]
    async fn test_disable_survives_cancelled_releaser() {
        let (subscription, counters) = feed(Duration::from_millis(20));

        let guard = subscription.acquire().await.unwrap();
        let releaser = tokio::spawn(guard.release());
        tokio::time::sleep(Duration::from_millis(5)).await;
        releaser.abort();

        wait_for_disable(&counters, 1).await;
        assert_eq!(subscription.holders(), 0);
    }

    #[tokio::test]
    async fn test_failed_enable_leaves_count_at_zero() {
        let counters = Arc::new(Counters::default());
        let control = CountingControl {
            counters: Arc::clone(&counters),
            delay: Duration::ZERO,
            fail_enable: true,
        };
        let subscription: Subscription<u32> =
            Subscription::new("denied", 4, control, CancellationToken::new());

        let result = subscription.acquire().await;
        assert!(matches!(
            result.err().and_then(|e| e.domain().cloned()),
            Some(DomainError::AccessDenied(_))
        ));
        assert_eq!(subscription.holders(), 0);
        assert_eq!(counters.disabled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_join_disables_feed_again() {
        let (subscription, counters) = feed(Duration::from_millis(20));

        let attempt =
            tokio::time::timeout(Duration::from_millis(5), subscription.acquire()).await;
        assert!(attempt.is_err());

        wait_for_disable(&counters, 1).await;
        assert_eq!(counters.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(subscription.holders(), 0);
    }

    /// Publishes an item as soon as the feed is switched on
    struct EagerControl {
        feed: Arc<OnceLock<Subscription<u32>>>,
    }

    #[async_trait]
    impl FeedControl for EagerControl {
        async fn enable(&self) -> Result<(), CorralError> {
            if let Some(feed) = self.feed.get() {
                feed.publish(7);
            }
            Ok(())
        }

        async fn disable(&self) -> Result<(), CorralError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_item_published_during_enable_is_delivered() {
        let cell = Arc::new(OnceLock::new());
        let control = EagerControl {
            feed: Arc::clone(&cell),
        };
        let subscription: Subscription<u32> =
            Subscription::new("eager", 4, control, CancellationToken::new());
        assert!(cell.set(subscription.clone()).is_ok());

        let mut guard = subscription.acquire().await.unwrap();
        assert_eq!(guard.next().await, Some(7));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking_others() {
        let counters = Arc::new(Counters::default());
        let control = CountingControl {
            counters,
            delay: Duration::ZERO,
            fail_enable: false,
        };
        let subscription: Subscription<u32> =
            Subscription::new("small", 2, control, CancellationToken::new());

        let mut slow = subscription.acquire().await.unwrap();
        let mut fast = subscription.acquire().await.unwrap();
        for i in 0..4 {
            subscription.publish(i);
            assert_eq!(fast.next().await, Some(i));
        }

        assert_eq!(slow.recv().await, Some(FeedItem::Lagged(2)));
        assert_eq!(slow.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_close_ends_subscribers() {
        let counters = Arc::new(Counters::default());
        let control = CountingControl {
            counters,
            delay: Duration::ZERO,
            fail_enable: false,
        };
        let closed = CancellationToken::new();
        let subscription: Subscription<u32> =
            Subscription::new("closing", 4, control, closed.clone());

        let mut guard = subscription.acquire().await.unwrap();
        let waiting = tokio::spawn(async move { guard.recv().await });
        closed.cancel();

        let next = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("subscriber still blocked after close")
            .unwrap();
        assert!(next.is_none());
    }
}

//! Change subscriptions of one memory region

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback run after a poll cycle changed bytes in a subscribed span.
///
/// Gets the span's bytes as that cycle read them.
pub type ChangeHandler = Arc<dyn Fn(&[u8]) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifier returned by a subscribe call
pub type SubscriptionId = u64;

/// One `(offset, length, handler)` entry
pub struct Subscription {
    id: SubscriptionId,
    /// Offset relative to the region start
    offset: usize,
    length: usize,
    handler: ChangeHandler,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// False once unsubscribed; batches already queued skip it
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether any byte of this span differs between the two images
    pub fn changed(&self, current: &[u8], previous: &[u8]) -> bool {
        let span = self.offset..self.offset + self.length;
        match (current.get(span.clone()), previous.get(span)) {
            (Some(now), Some(before)) => now != before,
            _ => false,
        }
    }

    /// Run the handler with this span of `current`
    pub async fn fire(&self, current: &[u8]) {
        if let Some(window) = current.get(self.offset..self.offset + self.length) {
            (self.handler)(window).await;
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscription set, safe to modify while a poll loop works on a snapshot
#[derive(Debug, Default)]
pub struct NotificationRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, offset: usize, length: usize, handler: ChangeHandler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let subscription = Arc::new(Subscription {
            id,
            offset,
            length,
            handler,
            active: AtomicBool::new(true),
        });
        self.subscriptions.lock().push(subscription);
        id
    }

    /// Remove a subscription; returns false when it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.iter().position(|s| s.id == id) {
            Some(index) => {
                let removed = subscriptions.remove(index);
                removed.active.store(false, Ordering::Release);
                true
            },
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for subscription in subscriptions.drain(..) {
            subscription.active.store(false, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current subscriptions in registration order
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions.lock().clone()
    }
}

/// Subscriptions of `watched` whose span differs between the two images
pub fn changed_subscriptions(
    watched: &[Arc<Subscription>],
    current: &[u8],
    previous: &[u8],
) -> Vec<Arc<Subscription>> {
    watched
        .iter()
        .filter(|s| s.is_active() && s.changed(current, previous))
        .cloned()
        .collect()
}

//! Replay-latest notifier
//!
//! Each scope holds the last published value plus its subscriber list.
//! Callbacks always run outside the internal lock, so a callback may
//! publish, subscribe or drop its own [`Subscription`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

struct Subscriber<V> {
    id: u64,
    callback: Callback<V>,
    /// One past the highest publication version delivered
    seen: Arc<AtomicU64>,
}

struct Scope<V> {
    /// Highest version ever stored; survives `clear`
    version: u64,
    latest: Option<V>,
    subscribers: Vec<Subscriber<V>>,
}

impl<V> Default for Scope<V> {
    fn default() -> Self {
        Self {
            version: 0,
            latest: None,
            subscribers: Vec::new(),
        }
    }
}

impl<V: Clone> Scope<V> {
    fn targets(&self) -> Vec<(Callback<V>, Arc<AtomicU64>)> {
        self.subscribers
            .iter()
            .map(|s| (Arc::clone(&s.callback), Arc::clone(&s.seen)))
            .collect()
    }
}

struct Inner<K, V> {
    scopes: HashMap<K, Scope<V>>,
    next_subscriber: u64,
}

/// Scope-keyed publish/subscribe with replay of the latest value
///
/// Cloning is cheap and yields a handle to the same state.
///
/// # Ordering
/// Every publication carries a version that increases per scope. The stored
/// latest value only moves forward, and a subscriber never observes an
/// older version after a newer one, even when a replay races with a
/// concurrent publish.
///
/// Owners that build values under their own lock should stamp the version
/// inside that critical section and publish with
/// [`publish_versioned`](Self::publish_versioned). Mixing it with
/// [`publish`](Self::publish) on the same scope is not supported.
pub struct Notifier<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for Notifier<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for Notifier<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Notifier<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Notifier")
            .field("scopes", &inner.scopes.len())
            .field("subscribers", &inner.next_subscriber)
            .finish()
    }
}

impl<K, V> Notifier<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty notifier
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                scopes: HashMap::new(),
                next_subscriber: 0,
            })),
        }
    }

    /// Store `value` as the latest for `scope` and deliver it to every
    /// current subscriber of that scope
    pub fn publish(&self, scope: K, value: V) {
        let (version, targets) = {
            let mut inner = self.inner.lock();
            let entry = inner.scopes.entry(scope).or_default();
            entry.version += 1;
            entry.latest = Some(value.clone());
            (entry.version, entry.targets())
        };

        tracing::trace!(version, subscribers = targets.len(), "publishing");
        for (callback, seen) in targets {
            deliver(version, &value, &callback, &seen);
        }
    }

    /// Publish `value` stamped with a caller-assigned `version`
    ///
    /// Versions must be at least 1 and increase in the order the caller
    /// produced the values. A value whose version is not newer than the
    /// stored one lost a race with a later publication: it is discarded and
    /// `false` is returned.
    pub fn publish_versioned(&self, scope: K, version: u64, value: V) -> bool {
        let targets = {
            let mut inner = self.inner.lock();
            let entry = inner.scopes.entry(scope).or_default();
            if version <= entry.version {
                tracing::trace!(version, stored = entry.version, "stale publication dropped");
                return false;
            }
            entry.version = version;
            entry.latest = Some(value.clone());
            entry.targets()
        };

        tracing::trace!(version, subscribers = targets.len(), "publishing");
        for (callback, seen) in targets {
            deliver(version, &value, &callback, &seen);
        }
        true
    }

    /// Store `value` as the latest for `scope` only if the scope holds no
    /// value. Existing subscribers are not notified; later subscribers
    /// receive it as their replay. Any later publication supersedes it.
    ///
    /// Returns `true` if the value was stored.
    pub fn seed(&self, scope: K, value: V) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.scopes.entry(scope).or_default();
        if entry.latest.is_some() {
            return false;
        }
        entry.latest = Some(value);
        true
    }

    /// Subscribe to `scope`
    ///
    /// If a value was already published for the scope, `callback` runs with
    /// it before this call returns. The subscription ends when the returned
    /// guard is dropped.
    pub fn subscribe<F>(&self, scope: K, callback: F) -> Subscription
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        let callback: Callback<V> = Arc::new(callback);
        let seen = Arc::new(AtomicU64::new(0));

        let (id, replay) = {
            let mut inner = self.inner.lock();
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            let entry = inner.scopes.entry(scope.clone()).or_default();
            entry.subscribers.push(Subscriber {
                id,
                callback: Arc::clone(&callback),
                seen: Arc::clone(&seen),
            });
            (id, entry.latest.clone().map(|value| (entry.version, value)))
        };

        if let Some((version, value)) = replay {
            deliver(version, &value, &callback, &seen);
        }

        let weak: Weak<Mutex<Inner<K, V>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock();
                if let Some(entry) = inner.scopes.get_mut(&scope) {
                    entry.subscribers.retain(|s| s.id != id);
                }
            }
        })
    }

    /// Subscribe through an unbounded channel
    ///
    /// The replayed value, if any, is the first item received.
    pub fn listen(&self, scope: K) -> Listener<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(scope, move |value: &V| {
            // Receiver dropped means the listener is gone; the guard
            // unsubscribes right after.
            let _ = tx.send(value.clone());
        });
        Listener {
            rx,
            _subscription: subscription,
        }
    }

    /// Latest value published for `scope`
    #[must_use]
    pub fn latest(&self, scope: &K) -> Option<V> {
        self.inner
            .lock()
            .scopes
            .get(scope)
            .and_then(|s| s.latest.clone())
    }

    /// Forget the latest value of `scope`, keeping its subscribers
    pub fn clear(&self, scope: &K) {
        if let Some(entry) = self.inner.lock().scopes.get_mut(scope) {
            entry.latest = None;
        }
    }

    /// Scopes that currently hold a value or subscribers
    #[must_use]
    pub fn scopes(&self) -> Vec<K> {
        self.inner.lock().scopes.keys().cloned().collect()
    }

    /// Number of live subscribers on `scope`
    #[must_use]
    pub fn subscriber_count(&self, scope: &K) -> usize {
        self.inner
            .lock()
            .scopes
            .get(scope)
            .map_or(0, |s| s.subscribers.len())
    }
}

fn deliver<V>(version: u64, value: &V, callback: &Callback<V>, seen: &AtomicU64) {
    let next = version + 1;
    if seen.fetch_max(next, Ordering::AcqRel) < next {
        callback(value);
    }
}

/// Guard that keeps a subscription alive
///
/// Dropping it unsubscribes. [`Subscription::detach`] keeps the callback
/// registered for the notifier's lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Keep the callback registered without holding the guard
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Channel-backed subscription for async consumers
#[derive(Debug)]
pub struct Listener<V> {
    rx: mpsc::UnboundedReceiver<V>,
    _subscription: Subscription,
}

impl<V> Listener<V> {
    /// Wait for the next value
    pub async fn recv(&mut self) -> Option<V> {
        self.rx.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<V> {
        self.rx.try_recv().ok()
    }

    /// Drain the queue and return the newest value, if any
    pub fn newest(&mut self) -> Option<V> {
        let mut newest = None;
        while let Ok(value) = self.rx.try_recv() {
            newest = Some(value);
        }
        newest
    }
}

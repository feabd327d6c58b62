//! In-memory holder of the current access credential.
//!
//! The store is the single source of truth for the credential. Every `set`
//! synchronously notifies subscribers in subscription order, including when
//! the value did not change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use super::credential::AccessCredential;
use crate::utils::lock;

type Callback = Arc<dyn Fn(Option<&AccessCredential>) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct StoreInner {
    current: Option<AccessCredential>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Clone is cheap - all clones share the same credential slot.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<AccessCredential> {
        lock(&self.inner).current.clone()
    }

    pub fn is_set(&self) -> bool {
        lock(&self.inner).current.is_some()
    }

    /// Replace the credential and notify every subscriber.
    pub fn set(&self, credential: Option<AccessCredential>) {
        // Snapshot under the lock, call outside it, so callbacks may
        // re-enter the store or unsubscribe.
        let snapshot: Vec<(Arc<AtomicBool>, Callback)> = {
            let mut inner = lock(&self.inner);
            inner.current = credential.clone();
            inner
                .subscribers
                .iter()
                .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                .collect()
        };

        trace!(
            present = credential.is_some(),
            subscribers = snapshot.len(),
            "Credential updated"
        );

        for (active, callback) in snapshot {
            // Skip subscribers removed by an earlier callback in this round
            if active.load(Ordering::Acquire) {
                callback(credential.as_ref());
            }
        }
    }

    pub fn clear(&self) {
        self.set(None);
    }

    /// Register `callback` for every future `set`. The subscription lasts
    /// until the returned handle is dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&AccessCredential>) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        });

        Subscription {
            id,
            active,
            store: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }
}

/// Handle returned by [`TokenStore::subscribe`].
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    store: Weak<Mutex<StoreInner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            // Dropped after the lock is released: the callback may own
            // other subscriptions to this store.
            let _removed = {
                let mut inner = lock(&store);
                let position = inner.subscribers.iter().position(|s| s.id == self.id);
                position.map(|i| inner.subscribers.remove(i))
            };
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

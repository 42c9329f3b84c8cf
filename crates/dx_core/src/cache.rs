//! Broker-fed in-memory caches.
//!
//! Each cache is a swappable immutable snapshot: readers clone an `Arc` to
//! the current map and never block the writer; the single writer (the
//! matching broker-queue listener) builds a new map and swaps the reference.
//! Request-handling tasks are read-only consumers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// An atomically swappable `String`-keyed map snapshot.
pub struct SnapshotMap<V> {
    inner: RwLock<Arc<HashMap<String, V>>>,
}

impl<V: Clone> SnapshotMap<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Current snapshot. Cheap: clones the Arc, not the map.
    pub fn load(&self) -> Arc<HashMap<String, V>> {
        Arc::clone(&self.inner.read().expect("cache lock poisoned"))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.load().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.load().contains_key(key)
    }

    /// Writer-side: publish a new snapshot with `key` set to `value`.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let mut guard = self.inner.write().expect("cache lock poisoned");
        let mut next = HashMap::clone(&guard);
        next.insert(key.into(), value);
        *guard = Arc::new(next);
    }

    /// Writer-side: publish a new snapshot without `key`.
    pub fn remove(&self, key: &str) {
        let mut guard = self.inner.write().expect("cache lock poisoned");
        if !guard.contains_key(key) {
            return;
        }
        let mut next = HashMap::clone(&guard);
        next.remove(key);
        *guard = Arc::new(next);
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.load().is_empty()
    }
}

impl<V: Clone> Default for SnapshotMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Token revocations pushed by the revoked-token listener.
///
/// A token is revoked when it was issued before the subject's recorded
/// revocation instant (credential rotation invalidates older tokens even
/// when signature and expiry are still valid).
#[derive(Default)]
pub struct RevocationCache {
    revoked: SnapshotMap<DateTime<Utc>>,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, subject: impl Into<String>, revoked_at: DateTime<Utc>) {
        self.revoked.insert(subject, revoked_at);
    }

    /// `issued_at` is the token's `iat`, in unix seconds.
    pub fn is_revoked(&self, subject: &str, issued_at: i64) -> bool {
        match self.revoked.get(subject) {
            Some(revoked_at) => issued_at < revoked_at.timestamp(),
            None => false,
        }
    }
}

/// Per-resource unique-attribute sets pushed by the attribute listener.
#[derive(Default)]
pub struct AttributeCache {
    attributes: SnapshotMap<HashSet<String>>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, resource_id: impl Into<String>, attribute: &str) {
        let key = resource_id.into();
        let mut set = self.attributes.get(&key).unwrap_or_default();
        set.insert(attribute.to_string());
        self.attributes.insert(key, set);
    }

    pub fn drop_attribute(&self, resource_id: &str, attribute: &str) {
        if let Some(mut set) = self.attributes.get(resource_id) {
            set.remove(attribute);
            if set.is_empty() {
                self.attributes.remove(resource_id);
            } else {
                self.attributes.insert(resource_id, set);
            }
        }
    }

    pub fn attributes(&self, resource_id: &str) -> HashSet<String> {
        self.attributes.get(resource_id).unwrap_or_default()
    }
}

//! Short-lived client-side query cache and optimistic toggles.
//!
//! Entries are keyed by query identity (for example `conversations:{actor}`)
//! and dropped on expiry or as soon as a mutation that could affect them
//! succeeds. Nothing here is durable; the datastore stays the source of
//! truth.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

pub struct QueryCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries().insert(
            key.into(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Return the cached value or run `fetch` and cache its success.
    /// Failures are not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// A locally displayed value that may run ahead of the server.
///
/// `apply` shows the expected outcome immediately; the caller then either
/// `commit`s the server's answer or `rollback`s to the last confirmed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimistic<T> {
    confirmed: T,
    shown: T,
    pending: bool,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            confirmed: value.clone(),
            shown: value,
            pending: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.shown
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn apply(&mut self, expected: T) {
        self.shown = expected;
        self.pending = true;
    }

    pub fn commit(&mut self, actual: T) {
        self.confirmed = actual.clone();
        self.shown = actual;
        self.pending = false;
    }

    pub fn rollback(&mut self) {
        self.shown = self.confirmed.clone();
        self.pending = false;
    }
}

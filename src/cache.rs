//! TTL cache with negative entries and in-flight request coalescing.
//!
//! A [`CacheStore`] holds either a fetched value or a [`Cached::Placeholder`]
//! recording that the last fetch failed. Placeholders get their own, shorter
//! TTL. Expiry is checked when reading; expired entries are swept on the next
//! write.
//!
//! [`CacheStore::get_or_fetch`] also coalesces concurrent misses:
//!
//! ```text
//! caller A ─┐
//!           │                       leader
//! caller B ─┼──► in-flight map ───► fetch() ──► store ──┐
//!           │         │                                 │
//! caller C ─┘         └──── broadcast::Receiver ◄───────┘
//! ```
//!
//! The first caller for a key runs the fetch, later callers subscribe to its
//! result. If the leader is dropped before finishing, its slot is released and
//! the waiters retry instead of waiting forever.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::BackendError;

/// A cache hit: either a value or the record of a failed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<V> {
    Value(V),
    Placeholder,
}

impl<V> Cached<V> {
    pub fn value(self) -> Option<V> {
        match self {
            Cached::Value(v) => Some(v),
            Cached::Placeholder => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Cached::Placeholder)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: Cached<V>,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// How [`CacheStore::get_or_fetch`] stores what it fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub ttl: Duration,
    /// When set, a failed fetch is cached as a placeholder for this long and
    /// returned as `Ok(Cached::Placeholder)` instead of an error.
    pub placeholder_ttl: Option<Duration>,
}

impl FetchPolicy {
    pub fn success_only(ttl: Duration) -> Self {
        Self { ttl, placeholder_ttl: None }
    }

    pub fn with_placeholder(ttl: Duration, placeholder_ttl: Duration) -> Self {
        Self { ttl, placeholder_ttl: Some(placeholder_ttl) }
    }
}

type Outcome<V> = Result<Cached<V>, BackendError>;

/// Counters for checking how often the backend was actually hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

pub struct CacheStore<K, V> {
    name: &'static str,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<K, broadcast::Sender<Outcome<V>>>>,
    stats: Mutex<CacheStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Returns the live entry for `key`, or `None` on a miss or an expired entry.
    pub fn get(&self, key: &K) -> Option<Cached<V>> {
        let now = Instant::now();
        let entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.store(key, Cached::Value(value), ttl);
    }

    pub fn put_placeholder(&self, key: K, ttl: Duration) {
        self.store(key, Cached::Placeholder, ttl);
    }

    fn store(&self, key: K, value: Cached<V>, ttl: Duration) {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(key, CacheEntry { value, stored_at: now, ttl });
    }

    pub fn remove(&self, key: &K) {
        lock(&self.entries).remove(key);
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }

    /// Returns the cached entry for `key`, running `fetch` on a miss. Only one
    /// fetch per key is in flight at a time; concurrent callers share its
    /// result.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, policy: FetchPolicy, fetch: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, BackendError>>,
    {
        let mut slot = loop {
            if let Some(hit) = self.get(&key) {
                lock(&self.stats).hits += 1;
                trace!(cache = self.name, key = ?key, "cache hit");
                return Ok(hit);
            }

            let waiter = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(&key) {
                    Some(tx) => Some(tx.subscribe()),
                    None => {
                        let (tx, _rx) = broadcast::channel(1);
                        in_flight.insert(key.clone(), tx);
                        None
                    }
                }
            };

            let Some(mut rx) = waiter else {
                break InFlightSlot { in_flight: &self.in_flight, key: Some(key.clone()) };
            };
            lock(&self.stats).coalesced += 1;
            debug!(cache = self.name, key = ?key, "coalescing with in-flight fetch");
            match rx.recv().await {
                Ok(outcome) => return outcome,
                // Leader went away without a result; go around again.
                Err(_) => continue,
            }
        };

        // A leader may have stored the value between our lookup and registration.
        if let Some(hit) = self.get(&key) {
            slot.release();
            return Ok(hit);
        }

        lock(&self.stats).misses += 1;
        debug!(cache = self.name, key = ?key, "cache miss, fetching");
        let outcome = match fetch().await {
            Ok(value) => {
                self.put(key.clone(), value.clone(), policy.ttl);
                Ok(Cached::Value(value))
            }
            Err(e) => match policy.placeholder_ttl {
                Some(ttl) => {
                    debug!(cache = self.name, key = ?key, error = %e, "caching failed fetch as placeholder");
                    self.put_placeholder(key.clone(), ttl);
                    Ok(Cached::Placeholder)
                }
                None => Err(e),
            },
        };

        if let Some(tx) = slot.release() {
            // No receivers is fine, nobody was waiting.
            let _ = tx.send(outcome.clone());
        }
        outcome
    }
}

/// Holds a key's in-flight registration and removes it when dropped.
struct InFlightSlot<'a, K: Eq + Hash, V> {
    in_flight: &'a Mutex<HashMap<K, broadcast::Sender<Outcome<V>>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> InFlightSlot<'_, K, V> {
    fn release(&mut self) -> Option<broadcast::Sender<Outcome<V>>> {
        let key = self.key.take()?;
        lock(self.in_flight).remove(&key)
    }
}

impl<K: Eq + Hash, V> Drop for InFlightSlot<'_, K, V> {
    fn drop(&mut self) {
        self.release();
    }
}

//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one execution of the
//! fetch. The shared result stays reusable for a short TTL after it settles,
//! so a burst arriving just after completion still hits the same result.
//! Once that TTL has passed the entry is evicted by a timer spawned at
//! settlement; an expired entry is also replaced by the next call for its key.

use std::{
    future::Future,
    hash::Hash,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// A fetch result shared by every caller of the same key.
pub type Coalesced<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    /// How long a settled result stays reusable.
    pub default_ttl: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(100),
        }
    }
}

struct InFlight<V, E> {
    future: Coalesced<V, E>,
    generation: u64,
    ttl: Duration,
    settled_at: Option<Instant>,
}

impl<V, E> InFlight<V, E> {
    fn is_expired(&self, now: Instant) -> bool {
        self.settled_at
            .is_some_and(|settled| now.saturating_duration_since(settled) >= self.ttl)
    }
}

/// Collapses concurrent identical fetches into one.
///
/// At most one fetch per key is executing at any instant. Errors are
/// shared the same way as values, so `E` must be `Clone`; wrap it in an
/// `Arc` if it is not.
///
/// Fetches are spawned onto the current tokio runtime, so they run to
/// completion even if every caller stops waiting.
pub struct RequestCoalescer<K, V, E> {
    entries: Arc<DashMap<K, InFlight<V, E>>>,
    next_generation: AtomicU64,
    config: CoalescerConfig,
    clock: Arc<dyn Clock>,
}

impl<K, V, E> RequestCoalescer<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(CoalescerConfig::default(), clock)
    }

    pub fn with_config(config: CoalescerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    /// Share `fetch` for `key` using the default TTL.
    ///
    /// Must be called from within a tokio runtime.
    pub fn coalesce<F, Fut>(&self, key: K, fetch: F) -> Coalesced<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        self.coalesce_with_ttl(key, self.config.default_ttl, fetch)
    }

    /// Share `fetch` for `key`, keeping the settled result for `ttl`.
    ///
    /// If a live entry exists its future is returned and `fetch` is dropped
    /// without being called.
    pub fn coalesce_with_ttl<F, Fut>(&self, key: K, ttl: Duration, fetch: F) -> Coalesced<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let now = self.clock.instant();

        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) if !occupied.get().is_expired(now) => {
                tracing::trace!("Joining in-flight request");
                occupied.get().future.clone()
            }
            entry => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let future = self.track(key, generation, ttl, fetch);
                let in_flight = InFlight {
                    future: future.clone(),
                    generation,
                    ttl,
                    settled_at: None,
                };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(in_flight);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(in_flight);
                    }
                }

                tokio::spawn(future.clone());
                future
            }
        }
    }

    /// Wrap `fetch` so that settling stamps its own entry and nobody else's,
    /// then schedules that entry's eviction.
    fn track<F, Fut>(&self, key: K, generation: u64, ttl: Duration, fetch: F) -> Coalesced<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let entries = Arc::downgrade(&self.entries);
        let clock = Arc::clone(&self.clock);

        async move {
            let result = fetch().await;

            let stamped = match entries.upgrade() {
                Some(map) => {
                    let mut stamped = false;
                    if let Some(mut entry) = map.get_mut(&key) {
                        if entry.generation == generation {
                            entry.settled_at = Some(clock.instant());
                            stamped = true;
                        }
                    }
                    stamped
                }
                None => false,
            };
            if stamped {
                tokio::spawn(evict_when_expired(entries, key, generation, ttl, clock));
            }

            result
        }
        .boxed()
        .shared()
    }

    /// Remove settled entries whose TTL has elapsed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.instant();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            tracing::debug!(count = removed, "Swept expired coalesced requests");
        }

        removed
    }

    /// Number of entries still executing.
    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.settled_at.is_none())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget the entry for `key`. Callers already holding its future keep it.
    pub fn clear(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }
}

/// Remove `key` after `ttl`, unless it was replaced or is not yet expired.
async fn evict_when_expired<K, V, E>(
    entries: Weak<DashMap<K, InFlight<V, E>>>,
    key: K,
    generation: u64,
    ttl: Duration,
    clock: Arc<dyn Clock>,
) where
    K: Eq + Hash,
{
    tokio::time::sleep(ttl).await;

    if let Some(entries) = entries.upgrade() {
        let now = clock.instant();
        let evicted = entries
            .remove_if(&key, |_, entry| entry.generation == generation && entry.is_expired(now))
            .is_some();
        if evicted {
            tracing::trace!("Evicted expired coalesced request");
        }
    }
}

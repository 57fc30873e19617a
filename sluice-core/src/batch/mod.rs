//! Batched key lookups (the DataLoader pattern).
//!
//! Single-key [`load`](BatchLoader::load) calls made close together are
//! collected into one open batch and resolved by one call to a [`BatchFn`].
//! Registration happens when `load` is called, not when its future is first
//! polled, so loads issued back to back always share a batch when the
//! scheduler defers the dispatch past them.

pub mod scheduler;

use std::{
    collections::{HashMap, hash_map::Entry},
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, LoadError, ValidationError};

pub use scheduler::{DelayScheduler, ManualScheduler, Scheduler, TokioScheduler};

/// The multi-key fetch behind a [`BatchLoader`].
///
/// Keys absent from the returned map resolve to `None` ("not found").
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    type Error: Clone + Send + Sync + 'static;

    async fn load(&self, keys: &[K]) -> Result<HashMap<K, V>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Keys per call to the batch function; larger batches are split.
    pub max_batch_size: usize,
    /// Upper bound on keys in one `load_many` call.
    pub max_keys_per_call: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_keys_per_call: None,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }
        if self.max_keys_per_call == Some(0) {
            return Err(ValidationError::InvalidField(
                "max_keys_per_call must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

type LoadResult<V, E> = Result<Option<V>, LoadError<E>>;
type Waiter<V, E> = oneshot::Sender<LoadResult<V, E>>;

/// The batch currently accepting keys.
struct OpenBatch<K, V, E> {
    /// Distinct keys in order of first registration.
    keys: Vec<K>,
    waiters: HashMap<K, Vec<Waiter<V, E>>>,
    scheduled: bool,
}

impl<K, V, E> Default for OpenBatch<K, V, E> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            waiters: HashMap::new(),
            scheduled: false,
        }
    }
}

struct LoaderInner<K, V, F>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    F: BatchFn<K, V>,
{
    batch_fn: F,
    config: BatchConfig,
    scheduler: Arc<dyn Scheduler>,
    open: Mutex<OpenBatch<K, V, F::Error>>,
}

/// Groups single-key loads into batched fetches.
///
/// Cloning is cheap and clones share the same open batch.
pub struct BatchLoader<K, V, F>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    F: BatchFn<K, V>,
{
    inner: Arc<LoaderInner<K, V, F>>,
}

impl<K, V, F> Clone for BatchLoader<K, V, F>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    F: BatchFn<K, V>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, F> BatchLoader<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    F: BatchFn<K, V>,
{
    /// A loader with default limits, dispatching on the tokio runtime.
    pub fn new(batch_fn: F) -> Self {
        Self::build(
            batch_fn,
            BatchConfig::default(),
            Arc::new(TokioScheduler::default()),
        )
    }

    pub fn with_config(batch_fn: F, config: BatchConfig) -> Result<Self, Error> {
        Self::with_scheduler(batch_fn, config, Arc::new(TokioScheduler::default()))
    }

    pub fn with_scheduler(
        batch_fn: F,
        config: BatchConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(batch_fn, config, scheduler))
    }

    fn build(batch_fn: F, config: BatchConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                batch_fn,
                config,
                scheduler,
                open: Mutex::new(OpenBatch::default()),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Register `key` in the open batch and wait for its value.
    pub fn load(
        &self,
        key: K,
    ) -> impl Future<Output = LoadResult<V, F::Error>> + Send + use<K, V, F> {
        let receiver = self.enqueue(key);
        async move { receiver.await.unwrap_or(Err(LoadError::Cleared)) }
    }

    /// Load several keys; values come back in the order the keys were given.
    pub fn load_many<I>(
        &self,
        keys: I,
    ) -> impl Future<Output = Result<Vec<Option<V>>, LoadError<F::Error>>> + Send + use<K, V, F, I>
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        let oversized = self
            .inner
            .config
            .max_keys_per_call
            .filter(|max| keys.len() > *max)
            .map(|max| LoadError::Oversized {
                requested: keys.len(),
                max,
            });

        let receivers: Vec<_> = match oversized {
            Some(_) => Vec::new(),
            None => keys.into_iter().map(|key| self.enqueue(key)).collect(),
        };

        async move {
            if let Some(error) = oversized {
                return Err(error);
            }

            let mut values = Vec::with_capacity(receivers.len());
            for receiver in receivers {
                match receiver.await.unwrap_or(Err(LoadError::Cleared)) {
                    Ok(value) => values.push(value),
                    Err(error) => return Err(error),
                }
            }
            Ok(values)
        }
    }

    /// Drop the pending waiters for `key`; they resolve to [`LoadError::Cleared`].
    ///
    /// Keys whose batch has already been dispatched are unaffected.
    pub fn clear(&self, key: &K) -> bool {
        let mut guard = self.inner.lock_open();
        let open = &mut *guard;
        if open.waiters.remove(key).is_none() {
            return false;
        }
        open.keys.retain(|pending| pending != key);
        true
    }

    /// Drop every pending waiter. Returns how many keys were pending.
    pub fn clear_all(&self) -> usize {
        let mut open = self.inner.lock_open();
        let cleared = open.keys.len();
        open.keys.clear();
        open.waiters.clear();
        cleared
    }

    /// Distinct keys waiting in the open batch.
    pub fn pending_keys(&self) -> usize {
        self.inner.lock_open().keys.len()
    }

    fn enqueue(&self, key: K) -> oneshot::Receiver<LoadResult<V, F::Error>> {
        let (sender, receiver) = oneshot::channel();

        let schedule = {
            let mut guard = self.inner.lock_open();
            let open = &mut *guard;
            match open.waiters.entry(key) {
                Entry::Occupied(mut waiting) => waiting.get_mut().push(sender),
                Entry::Vacant(vacant) => {
                    open.keys.push(vacant.key().clone());
                    vacant.insert(vec![sender]);
                }
            }
            !std::mem::replace(&mut open.scheduled, true)
        };

        if schedule {
            let inner = Arc::clone(&self.inner);
            self.inner
                .scheduler
                .schedule(Box::pin(async move { inner.dispatch().await }));
        }

        receiver
    }
}

impl<K, V, F> LoaderInner<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    F: BatchFn<K, V>,
{
    fn lock_open(&self) -> MutexGuard<'_, OpenBatch<K, V, F::Error>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(&self) {
        // Close the batch before running it so new loads start a fresh one.
        let OpenBatch { keys, mut waiters, .. } = std::mem::take(&mut *self.lock_open());
        if keys.is_empty() {
            return;
        }

        tracing::debug!(keys = keys.len(), "Dispatching batch");

        let results = join_all(
            keys.chunks(self.config.max_batch_size)
                .map(|chunk| self.batch_fn.load(chunk)),
        )
        .await;

        let mut values = HashMap::with_capacity(keys.len());
        for result in results {
            match result {
                Ok(found) => values.extend(found),
                Err(error) => {
                    tracing::warn!(keys = keys.len(), "Batch load failed");
                    for waiter in waiters.into_values().flatten() {
                        let _ = waiter.send(Err(LoadError::Batch(error.clone())));
                    }
                    return;
                }
            }
        }

        for key in &keys {
            let Some(pending) = waiters.remove(key) else {
                continue;
            };
            let value = values.get(key);
            for waiter in pending {
                // A closed receiver means the caller stopped waiting.
                let _ = waiter.send(Ok(value.cloned()));
            }
        }
    }
}

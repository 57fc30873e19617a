//! # Sluice
//!
//! In-process admission control and request deduplication for web backends.
//!
//! A [`Sluice`] bundles the components that guard an application:
//!
//! - a fixed-window [`RateLimiter`] keyed by [`RequestIdentifier`],
//! - a [`LockoutGuard`] adding progressive delays and lockouts on top of a
//!   persisted login attempt log,
//! - factories for [`RequestCoalescer`]s and [`BatchLoader`]s that share its
//!   clock and limits.
//!
//! It is built once with [`SluiceBuilder`] and shared by handle. Expired
//! state is removed by the task started with [`Sluice::start_sweepers`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice::{RateLimitProfile, SluiceBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sluice = SluiceBuilder::new()
//!         .with_sqlite("sqlite://sluice.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let sweepers = sluice.start_sweepers(shutdown_rx);
//!
//!     let decision = sluice
//!         .rate_limiter()
//!         .check_profile("ip:203.0.113.9", RateLimitProfile::Auth)?;
//!     if decision.success {
//!         let status = sluice.lockout().check_lockout(None, "203.0.113.9").await?;
//!         println!("login allowed: {}", status.allowed);
//!     }
//!
//!     shutdown_tx.send(true)?;
//!     sweepers.await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod store;

use std::{hash::Hash, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

pub use builder::{NoStorage, SluiceBuilder, SluiceBuilderError, WithStorage};
pub use store::AttemptStore;

pub use sluice_core::{
    BatchConfig, BatchFn, BatchLoader, Clock, Coalesced, CoalescerConfig, Error,
    InMemoryLoginAttemptRepository, LoadError, LockoutConfig, LockoutDecision, LockoutGuard,
    LoginAttemptRepository, ManualClock, RateLimitConfig, RateLimitDecision, RateLimitProfile,
    RateLimiter, RequestCoalescer, RequestIdentifier, Scheduler, StorageError,
    StoreFailurePolicy, SystemClock, ValidationError, lockout::SuspiciousIpReport,
};

/// Re-export SQLite storage types
#[cfg(feature = "sqlite")]
pub mod sqlite {
    pub use sluice_storage_sqlite::{SqliteLoginAttemptRepository, SqliteStorage};
}

/// The shared admission-control handle.
///
/// Cloning is cheap; clones share the same limiter and guard.
pub struct Sluice<R: AttemptStore> {
    rate_limiter: Arc<RateLimiter>,
    lockout: Arc<LockoutGuard<R>>,
    clock: Arc<dyn Clock>,
    coalescer_config: CoalescerConfig,
    batch_config: BatchConfig,
    sweep_interval: Duration,
    max_window: Duration,
}

impl<R: AttemptStore> Clone for Sluice<R> {
    fn clone(&self) -> Self {
        Self {
            rate_limiter: Arc::clone(&self.rate_limiter),
            lockout: Arc::clone(&self.lockout),
            clock: Arc::clone(&self.clock),
            coalescer_config: self.coalescer_config,
            batch_config: self.batch_config,
            sweep_interval: self.sweep_interval,
            max_window: self.max_window,
        }
    }
}

impl<R: AttemptStore> Sluice<R> {
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &Arc<LockoutGuard<R>> {
        &self.lockout
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create or upgrade the attempt store's schema.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.lockout.repository().migrate().await
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.lockout.repository().health_check().await
    }

    /// A coalescer using this instance's clock and default TTL.
    pub fn new_coalescer<K, V, E>(&self) -> RequestCoalescer<K, V, E>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        RequestCoalescer::with_config(self.coalescer_config, Arc::clone(&self.clock))
    }

    /// A batch loader over `batch_fn` using this instance's batch limits.
    pub fn new_batch_loader<K, V, F>(&self, batch_fn: F) -> Result<BatchLoader<K, V, F>, Error>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + 'static,
        F: BatchFn<K, V>,
    {
        BatchLoader::with_config(batch_fn, self.batch_config)
    }

    /// Run one sweep: expired rate limit counters and attempt records past retention.
    pub async fn sweep(&self) -> SweepReport {
        sweep_once(&self.rate_limiter, &self.lockout, self.max_window).await
    }

    /// Spawn a background task that sweeps expired state on an interval.
    ///
    /// The first sweep runs immediately. The task exits when `shutdown`
    /// changes or its sender is dropped.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - A watch receiver that signals when to stop the task
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task.
    pub fn start_sweepers(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let lockout = Arc::clone(&self.lockout);
        let max_window = self.max_window;
        let sweep_interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        sweep_once(&rate_limiter, &lockout, max_window).await;
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down sluice sweepers");
                        break;
                    }
                }
            }
        })
    }
}

/// What a single sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_entries: usize,
    pub login_attempts: u64,
}

async fn sweep_once<R: AttemptStore>(
    rate_limiter: &RateLimiter,
    lockout: &LockoutGuard<R>,
    max_window: Duration,
) -> SweepReport {
    let rate_limit_entries = rate_limiter.sweep(max_window);

    let login_attempts = match lockout.cleanup_old_attempts().await {
        Ok(count) => {
            if count > 0 {
                tracing::info!(count = count, "Cleaned up old login attempt records");
            }
            count
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to cleanup old login attempt records");
            0
        }
    };

    SweepReport {
        rate_limit_entries,
        login_attempts,
    }
}

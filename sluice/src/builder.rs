//! Builder pattern for constructing Sluice instances
//!
//! The attempt store must be chosen before anything can be built; the
//! remaining settings all have defaults.
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice::{RateLimitProfile, SluiceBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Persistent attempt log, schema created on build
//!     let sluice = SluiceBuilder::new()
//!         .with_sqlite("sqlite://sluice.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Process-local attempt log
//!     let sluice = SluiceBuilder::new()
//!         .with_memory_store()
//!         .with_rate_limit_profile(RateLimitProfile::Read)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::{sync::Arc, time::Duration};

use sluice_core::{
    BatchConfig, Clock, CoalescerConfig, InMemoryLoginAttemptRepository, LockoutConfig,
    LockoutGuard, RateLimitProfile, RateLimiter, SystemClock,
};

use crate::{Sluice, store::AttemptStore};

/// How often the background sweepers run unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur when building a Sluice instance.
#[derive(Debug, thiserror::Error)]
pub enum SluiceBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Marker type indicating no attempt store has been configured yet.
pub struct NoStorage;

/// Marker type indicating an attempt store has been configured.
pub struct WithStorage<R: AttemptStore> {
    repository: Arc<R>,
}

/// A type-safe builder for [`Sluice`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, an attempt store must be configured
/// - [`WithStorage<R>`]: Store configured, ready to build
pub struct SluiceBuilder<Storage> {
    storage: Storage,
    default_profile: RateLimitProfile,
    lockout_config: LockoutConfig,
    coalescer_config: CoalescerConfig,
    batch_config: BatchConfig,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    max_window: Duration,
    apply_migrations: bool,
}

impl Default for SluiceBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl SluiceBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Default rate limit profile: `api` (100 requests per minute)
    /// - Lockout: enabled (5 attempts in 30 minutes, 30 minute lockout)
    /// - Coalescing TTL: 100ms
    /// - Batch size: 100 keys
    /// - Sweep interval: 60 seconds
    /// - Max rate limit window: longest profile window (1 hour)
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            default_profile: RateLimitProfile::default(),
            lockout_config: LockoutConfig::default(),
            coalescer_config: CoalescerConfig::default(),
            batch_config: BatchConfig::default(),
            clock: Arc::new(SystemClock),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_window: RateLimitProfile::longest_window(),
            apply_migrations: false,
        }
    }

    /// Keep the attempt log in process memory.
    pub fn with_memory_store(self) -> SluiceBuilder<WithStorage<InMemoryLoginAttemptRepository>> {
        self.with_repository(Arc::new(InMemoryLoginAttemptRepository::new()))
    }

    /// Use an already constructed attempt store.
    pub fn with_repository<R: AttemptStore>(
        self,
        repository: Arc<R>,
    ) -> SluiceBuilder<WithStorage<R>> {
        SluiceBuilder {
            storage: WithStorage { repository },
            default_profile: self.default_profile,
            lockout_config: self.lockout_config,
            coalescer_config: self.coalescer_config,
            batch_config: self.batch_config,
            clock: self.clock,
            sweep_interval: self.sweep_interval,
            max_window: self.max_window,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl SluiceBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<
        SluiceBuilder<WithStorage<sluice_storage_sqlite::SqliteLoginAttemptRepository>>,
        SluiceBuilderError,
    > {
        let storage = sluice_storage_sqlite::SqliteStorage::connect(url)
            .await
            .map_err(|e| SluiceBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repository(storage.login_attempts()))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> SluiceBuilder<WithStorage<sluice_storage_sqlite::SqliteLoginAttemptRepository>> {
        self.with_repository(Arc::new(
            sluice_storage_sqlite::SqliteLoginAttemptRepository::new(pool),
        ))
    }
}

impl<Storage> SluiceBuilder<Storage> {
    /// Profile applied by [`RateLimiter::check_default`].
    pub fn with_rate_limit_profile(mut self, profile: RateLimitProfile) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn with_lockout_config(mut self, config: LockoutConfig) -> Self {
        self.lockout_config = config;
        self
    }

    pub fn with_coalescer_config(mut self, config: CoalescerConfig) -> Self {
        self.coalescer_config = config;
        self
    }

    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    /// Time source shared by every component. Tests pass a
    /// [`ManualClock`](sluice_core::ManualClock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How often [`Sluice::start_sweepers`] sweeps expired state.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Longest rate limit window in use. Counters older than this are swept.
    ///
    /// Defaults to the longest window in the profile catalogue; raise it when
    /// checking with custom configs that have longer windows.
    pub fn with_max_window(mut self, window: Duration) -> Self {
        self.max_window = window;
        self
    }

    /// Create the attempt store's schema during [`build`](SluiceBuilder::build).
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

impl<R: AttemptStore> SluiceBuilder<WithStorage<R>> {
    /// Validate the configuration and assemble the [`Sluice`] handle.
    pub async fn build(self) -> Result<Sluice<R>, SluiceBuilderError> {
        self.batch_config
            .validate()
            .map_err(|e| SluiceBuilderError::InvalidConfiguration(e.to_string()))?;
        if self.sweep_interval.is_zero() {
            return Err(SluiceBuilderError::InvalidConfiguration(
                "sweep interval must be longer than zero".to_string(),
            ));
        }
        if self.lockout_config.max_attempts == 0 {
            return Err(SluiceBuilderError::InvalidConfiguration(
                "max_attempts must be greater than zero".to_string(),
            ));
        }

        let repository = self.storage.repository;
        if self.apply_migrations {
            repository
                .migrate()
                .await
                .map_err(|e| SluiceBuilderError::Migration(e.to_string()))?;
        }

        let rate_limiter = Arc::new(RateLimiter::with_default_profile(
            self.clock.clone(),
            self.default_profile,
        ));
        let lockout = Arc::new(LockoutGuard::new(
            repository,
            self.lockout_config,
            self.clock.clone(),
        ));

        tracing::debug!(
            default_profile = self.default_profile.name(),
            lockout_enabled = lockout.is_enabled(),
            "Built sluice"
        );

        Ok(Sluice {
            rate_limiter,
            lockout,
            clock: self.clock,
            coalescer_config: self.coalescer_config,
            batch_config: self.batch_config,
            sweep_interval: self.sweep_interval,
            max_window: self.max_window.max(RateLimitProfile::longest_window()),
        })
    }
}

//! Schema migrations for sluice storage backends.
//!
//! The only persisted state in sluice is the login attempt log, so a backend's
//! schema is short: one table plus the indexes that keep the per-user and
//! per-address window queries cheap. Each step is a [`Migration`] with a
//! strictly increasing version, and a backend's [`MigrationManager`] applies
//! the steps it has not seen yet, one transaction per step, recording each in
//! the `_sluice_migrations` table.
//!
//! Applying is idempotent, so [`MigrationManager::up`] is safe to call on
//! every start.

use async_trait::async_trait;
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Migration versions out of order: {previous} is followed by {next}")]
    OutOfOrder { previous: i64, next: i64 },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

/// One step of a backend's attempt-log schema.
///
/// `up` runs inside the transaction that also records the step, so a failed
/// step leaves neither schema changes nor a bookkeeping row behind. `down`
/// must undo exactly what `up` created.
#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Position in the backend's list. Versions must strictly increase.
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix timestamp in seconds.
    pub applied_at: i64,
}

/// Applies a backend's migration list against its pool.
///
/// Implementations call [`ensure_ordered`] before touching the database and
/// skip steps whose version is already recorded.
#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_sluice_migrations"
    }

    /// Create the bookkeeping table if it does not exist.
    async fn initialize(&self) -> Result<()>;

    /// Apply unrecorded steps, oldest first.
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Roll back recorded steps, newest first.
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;
}

/// Reject migration lists whose versions are not strictly increasing.
pub fn ensure_ordered<DB: Database>(migrations: &[Box<dyn Migration<DB>>]) -> Result<()> {
    for pair in migrations.windows(2) {
        let (previous, next) = (pair[0].version(), pair[1].version());
        if next <= previous {
            tracing::error!(
                previous = previous,
                next = next,
                name = pair[1].name(),
                "Attempt log migrations are out of order"
            );
            return Err(MigrationError::OutOfOrder { previous, next });
        }
    }
    Ok(())
}

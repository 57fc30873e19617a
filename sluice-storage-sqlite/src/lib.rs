//! SQLite storage backend for sluice.
//!
//! Persists the login attempt log behind
//! [`LoginAttemptRepository`](sluice_core::LoginAttemptRepository) so lockout
//! state survives restarts and is shared by every process pointing at the
//! same database file.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), sluice_core::Error> {
//! use sluice_storage_sqlite::SqliteStorage;
//!
//! let storage = SqliteStorage::connect("sqlite://sluice.db?mode=rwc").await?;
//! storage.migrate().await?;
//! let repository = storage.login_attempts();
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

use std::sync::Arc;

use sluice_core::{Error, error::StorageError};
use sluice_migration::MigrationManager;
use sqlx::SqlitePool;

use crate::migrations::{SqliteMigrationManager, migrations};
pub use crate::repositories::SqliteLoginAttemptRepository;

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            StorageError::Unavailable(format!("Failed to connect to {database_url}"))
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create or upgrade the schema. Safe to call on every start.
    pub async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            StorageError::Migration("Failed to initialize migrations".to_string())
        })?;

        manager.up(&migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            StorageError::Migration("Failed to run migrations".to_string())
        })?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn login_attempts(&self) -> Arc<SqliteLoginAttemptRepository> {
        Arc::new(SqliteLoginAttemptRepository::new(self.pool.clone()))
    }
}

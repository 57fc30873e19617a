//! Attempt stores the facade knows how to prepare.

use async_trait::async_trait;
use sluice_core::{Error, InMemoryLoginAttemptRepository, LoginAttemptRepository};

/// A [`LoginAttemptRepository`] with the lifecycle hooks the builder needs.
#[async_trait]
pub trait AttemptStore: LoginAttemptRepository {
    /// Create or upgrade whatever schema the store needs.
    async fn migrate(&self) -> Result<(), Error>;

    /// Cheap round trip proving the store is reachable.
    async fn health_check(&self) -> Result<(), Error>;
}

#[async_trait]
impl AttemptStore for InMemoryLoginAttemptRepository {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
#[async_trait]
impl AttemptStore for sluice_storage_sqlite::SqliteLoginAttemptRepository {
    async fn migrate(&self) -> Result<(), Error> {
        sluice_storage_sqlite::SqliteStorage::new(self.pool().clone())
            .migrate()
            .await
    }

    async fn health_check(&self) -> Result<(), Error> {
        sluice_storage_sqlite::SqliteStorage::new(self.pool().clone())
            .health_check()
            .await
    }
}

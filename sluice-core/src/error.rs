use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The attempt store could not be reached at all.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Record not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_requests must be greater than zero")]
    ZeroMaxRequests,

    #[error("window must be longer than zero")]
    ZeroWindow,

    #[error("max_batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

/// Outcome of a failed [`BatchLoader`](crate::batch::BatchLoader) lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError<E> {
    /// The batch function rejected; every waiter of the dispatch sees the same error.
    #[error("Batch load failed: {0}")]
    Batch(E),

    #[error("Pending load was cleared before dispatch")]
    Cleared,

    #[error("Batch of {requested} keys exceeds the maximum of {max}")]
    Oversized { requested: usize, max: usize },
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    /// True when the attempt store itself is unreachable, as opposed to a query failure.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Unavailable(_)))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let storage_error = Error::Storage(StorageError::Unavailable("pool closed".to_string()));
        assert_eq!(
            storage_error.to_string(),
            "Storage error: Store unavailable: pool closed"
        );

        let validation_error = Error::Validation(ValidationError::ZeroMaxRequests);
        assert_eq!(
            validation_error.to_string(),
            "Validation error: max_requests must be greater than zero"
        );
    }

    #[test]
    fn test_error_kind_helpers() {
        assert!(Error::Storage(StorageError::NotFound).is_storage_error());
        assert!(!Error::Storage(StorageError::NotFound).is_store_unavailable());
        assert!(
            Error::Storage(StorageError::Unavailable("down".to_string())).is_store_unavailable()
        );
        assert!(Error::Validation(ValidationError::ZeroWindow).is_validation_error());
        assert!(!Error::Validation(ValidationError::ZeroWindow).is_storage_error());
    }

    #[test]
    fn test_load_error_variants() {
        let batch: LoadError<String> = LoadError::Batch("backend timeout".to_string());
        assert_eq!(batch.to_string(), "Batch load failed: backend timeout");

        let oversized: LoadError<String> = LoadError::Oversized {
            requested: 150,
            max: 100,
        };
        assert_eq!(
            oversized.to_string(),
            "Batch of 150 keys exceeds the maximum of 100"
        );
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = ValidationError::ZeroBatchSize.into();
        assert!(matches!(
            error,
            Error::Validation(ValidationError::ZeroBatchSize)
        ));

        let error: Error = StorageError::Database("syntax".to_string()).into();
        assert!(error.is_storage_error());
    }
}

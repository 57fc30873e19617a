//! Tests for the Sluice builder pattern

use std::{sync::Arc, time::Duration};

use sluice::{
    BatchConfig, LockoutConfig, ManualClock, RateLimitProfile, SluiceBuilder, SluiceBuilderError,
};

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite() {
    let _ = tracing_subscriber::fmt().try_init();

    let sluice = SluiceBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Sluice");

    sluice.health_check().await.expect("Health check failed");

    let decision = sluice
        .lockout()
        .handle_login_attempt(Some("alice"), "10.0.0.1", None, false)
        .await
        .expect("Failed to record attempt");
    assert!(decision.allowed);
    assert_eq!(decision.failed_attempts, 1);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite_pool() {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");

    let sluice = SluiceBuilder::new()
        .with_sqlite_pool(pool)
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Sluice");

    sluice.health_check().await.expect("Health check failed");
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_manual_migration() {
    let _ = tracing_subscriber::fmt().try_init();

    let sluice = SluiceBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .build()
        .await
        .expect("Failed to build Sluice");

    // Without migrations the attempt table does not exist yet
    let result = sluice
        .lockout()
        .check_lockout(Some("alice"), "10.0.0.1")
        .await;
    assert!(result.is_err());

    sluice.migrate().await.expect("Migration failed");

    let status = sluice
        .lockout()
        .check_lockout(Some("alice"), "10.0.0.1")
        .await
        .expect("Lockout check failed");
    assert!(status.allowed);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_unreachable_sqlite() {
    let result = SluiceBuilder::new()
        .with_sqlite("sqlite:///nonexistent-dir/sluice.db")
        .await;

    assert!(matches!(
        result,
        Err(SluiceBuilderError::StorageConnection(_))
    ));
}

#[tokio::test]
async fn test_builder_with_memory_store() {
    let sluice = SluiceBuilder::new()
        .with_memory_store()
        .with_rate_limit_profile(RateLimitProfile::Auth)
        .build()
        .await
        .expect("Failed to build Sluice");

    assert_eq!(
        sluice.rate_limiter().default_profile(),
        RateLimitProfile::Auth
    );

    for remaining in (0..5).rev() {
        let decision = sluice.rate_limiter().check_default("ip:10.0.0.1").unwrap();
        assert!(decision.success);
        assert_eq!(decision.remaining, remaining);
    }
    let decision = sluice.rate_limiter().check_default("ip:10.0.0.1").unwrap();
    assert!(!decision.success);
}

#[tokio::test]
async fn test_builder_rejects_invalid_batch_config() {
    let result = SluiceBuilder::new()
        .with_memory_store()
        .with_batch_config(BatchConfig {
            max_batch_size: 0,
            max_keys_per_call: None,
        })
        .build()
        .await;

    assert!(matches!(
        result,
        Err(SluiceBuilderError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_builder_rejects_zero_sweep_interval() {
    let result = SluiceBuilder::new()
        .with_memory_store()
        .with_sweep_interval(Duration::ZERO)
        .build()
        .await;

    assert!(matches!(
        result,
        Err(SluiceBuilderError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_builder_passes_lockout_config_and_clock() {
    let clock = Arc::new(ManualClock::new());
    let sluice = SluiceBuilder::new()
        .with_memory_store()
        .with_lockout_config(LockoutConfig {
            max_attempts: 2,
            ..LockoutConfig::default()
        })
        .with_clock(clock.clone())
        .build()
        .await
        .expect("Failed to build Sluice");

    let lockout = sluice.lockout();
    lockout
        .handle_login_attempt(Some("alice"), "10.0.0.1", None, false)
        .await
        .unwrap();
    let decision = lockout
        .handle_login_attempt(Some("alice"), "10.0.0.1", None, false)
        .await
        .unwrap();
    assert!(!decision.allowed);

    clock.advance(Duration::from_secs(31 * 60));
    let status = lockout.check_lockout(Some("alice"), "10.0.0.1").await.unwrap();
    assert!(status.allowed);
}

//! SQLite implementation of the login attempt log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::{
    Error,
    error::StorageError,
    lockout::{
        AttemptScope, AttemptStats, IpActivity, LoginAttempt, LoginAttemptRepository,
        NewLoginAttempt,
    },
};
use sqlx::SqlitePool;

/// SQLite repository for login attempts.
pub struct SqliteLoginAttemptRepository {
    pool: SqlitePool,
}

impl SqliteLoginAttemptRepository {
    /// Create a new SQLite login attempt repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteLoginAttempt {
    id: i64,
    user_id: Option<String>,
    ip_address: String,
    user_agent: Option<String>,
    success: bool,
    attempted_at: i64,
}

impl From<SqliteLoginAttempt> for LoginAttempt {
    fn from(row: SqliteLoginAttempt) -> Self {
        LoginAttempt {
            id: row.id,
            user_id: row.user_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            success: row.success,
            attempted_at: from_millis(row.attempted_at),
        }
    }
}

/// Internal struct for attempt stats query
#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptStats {
    count: i64,
    latest_at: Option<i64>,
}

/// Internal struct for per-address activity query
#[derive(Debug, sqlx::FromRow)]
struct SqliteIpActivity {
    failed_attempts: i64,
    distinct_users: i64,
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

fn to_count(count: i64) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Connection-level failures mean the store is unreachable; anything else is a query problem.
fn storage_error(e: &sqlx::Error, message: &str) -> StorageError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => StorageError::Unavailable(message.to_string()),
        _ => StorageError::Database(message.to_string()),
    }
}

#[async_trait]
impl LoginAttemptRepository for SqliteLoginAttemptRepository {
    async fn record_attempt(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
        let row = sqlx::query_as::<_, SqliteLoginAttempt>(
            r#"
            INSERT INTO login_attempts (user_id, ip_address, user_agent, success, attempted_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, user_id, ip_address, user_agent, success, attempted_at
            "#,
        )
        .bind(&attempt.user_id)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.success)
        .bind(attempt.attempted_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to record login attempt");
            storage_error(&e, "Failed to record login attempt")
        })?;

        Ok(row.into())
    }

    async fn failure_stats(
        &self,
        scope: &AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        let (column, value) = match scope {
            AttemptScope::User(user_id) => ("user_id", user_id.as_str()),
            AttemptScope::Ip(ip_address) => ("ip_address", ip_address.as_str()),
        };

        let stats = sqlx::query_as::<_, SqliteAttemptStats>(
            format!(
                r#"
            SELECT COUNT(*) as count, MAX(attempted_at) as latest_at
            FROM login_attempts
            WHERE {column} = ? AND success = 0 AND attempted_at >= ?
            "#
            )
            .as_str(),
        )
        .bind(value)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, scope = ?scope, "Failed to get attempt stats");
            storage_error(&e, "Failed to get attempt stats")
        })?;

        Ok(AttemptStats {
            failed_attempts: to_count(stats.count),
            latest_failure_at: stats.latest_at.map(from_millis),
        })
    }

    async fn ip_activity(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<IpActivity, Error> {
        let activity = sqlx::query_as::<_, SqliteIpActivity>(
            r#"
            SELECT COUNT(*) as failed_attempts, COUNT(DISTINCT user_id) as distinct_users
            FROM login_attempts
            WHERE ip_address = ? AND success = 0 AND attempted_at >= ?
            "#,
        )
        .bind(ip_address)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ip_address, "Failed to get address activity");
            storage_error(&e, "Failed to get address activity")
        })?;

        Ok(IpActivity {
            failed_attempts: to_count(activity.failed_attempts),
            distinct_users: to_count(activity.distinct_users),
        })
    }

    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE attempted_at < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to cleanup old login attempts");
                storage_error(&e, "Failed to cleanup old login attempts")
            })?;

        Ok(result.rows_affected())
    }
}

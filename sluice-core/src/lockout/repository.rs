//! Repository trait for the login attempt log.

use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{AttemptScope, AttemptStats, IpActivity, LoginAttempt, NewLoginAttempt};
use crate::Error;

/// Storage for login attempts.
///
/// Implementations keep an append-only log: rows are never updated, and the
/// only deletion is retention cleanup of rows older than a cutoff. Lockout
/// state is always derived by counting recent failures.
///
/// Failures to reach the backing store should surface as
/// [`StorageError::Unavailable`](crate::error::StorageError::Unavailable).
#[async_trait]
pub trait LoginAttemptRepository: Send + Sync + 'static {
    /// Append one attempt, successful or not.
    async fn record_attempt(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error>;

    /// Count failed attempts for `scope` at or after `since`, with the latest failure time.
    async fn failure_stats(
        &self,
        scope: &AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error>;

    /// Failed attempts from one address at or after `since`, and how many users they targeted.
    async fn ip_activity(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<IpActivity, Error>;

    /// Delete attempts older than `before`. Returns the number of rows removed.
    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}

/// A process-local attempt log, for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryLoginAttemptRepository {
    attempts: Mutex<Vec<LoginAttempt>>,
}

impl InMemoryLoginAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored attempt, oldest first.
    pub fn attempts(&self) -> Vec<LoginAttempt> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LoginAttempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LoginAttemptRepository for InMemoryLoginAttemptRepository {
    async fn record_attempt(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
        let mut attempts = self.lock();
        let id = attempts.last().map_or(1, |last| last.id + 1);
        let attempt = LoginAttempt {
            id,
            user_id: attempt.user_id,
            ip_address: attempt.ip_address,
            user_agent: attempt.user_agent,
            success: attempt.success,
            attempted_at: attempt.attempted_at,
        };
        attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn failure_stats(
        &self,
        scope: &AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<AttemptStats, Error> {
        let attempts = self.lock();
        let failures: Vec<_> = attempts
            .iter()
            .filter(|a| !a.success && a.attempted_at >= since && scope.matches(a))
            .collect();

        Ok(AttemptStats {
            failed_attempts: failures.len() as u32,
            latest_failure_at: failures.iter().map(|a| a.attempted_at).max(),
        })
    }

    async fn ip_activity(
        &self,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<IpActivity, Error> {
        let attempts = self.lock();
        let mut failed_attempts = 0;
        let mut users = HashSet::new();
        for attempt in attempts
            .iter()
            .filter(|a| !a.success && a.attempted_at >= since && a.ip_address == ip_address)
        {
            failed_attempts += 1;
            if let Some(user_id) = &attempt.user_id {
                users.insert(user_id.as_str());
            }
        }

        Ok(IpActivity {
            failed_attempts,
            distinct_users: users.len() as u32,
        })
    }

    async fn cleanup_old_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut attempts = self.lock();
        let before_len = attempts.len();
        attempts.retain(|a| a.attempted_at >= before);
        Ok((before_len - attempts.len()) as u64)
    }
}

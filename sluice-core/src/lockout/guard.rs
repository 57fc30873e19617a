//! Login lockout service.
//!
//! Every login attempt is appended to the attempt log before anything is
//! decided. Failed attempts are then counted over a rolling window, per user
//! and per address, and turned into either a progressive delay or a lockout
//! that lasts `lockout_duration` past the most recent failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_core::lockout::{LockoutConfig, LockoutGuard};
//!
//! let guard = LockoutGuard::new(repository, LockoutConfig::default(), clock);
//!
//! // Before verifying credentials
//! let status = guard.check_lockout(Some("user_1"), "203.0.113.9").await?;
//! if !status.allowed {
//!     // Respond with 429 and status.retry_after
//! }
//!
//! // After verifying credentials
//! let decision = guard
//!     .handle_login_attempt(Some("user_1"), "203.0.113.9", user_agent, false)
//!     .await?;
//! tokio::time::sleep(decision.delay).await;
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};

use super::{
    repository::LoginAttemptRepository,
    types::{
        AttemptScope, AttemptStats, LockoutConfig, LockoutDecision, NewLoginAttempt,
        StoreFailurePolicy, SuspiciousIpReport, progressive_delay,
    },
};
use crate::{Error, clock::Clock};

/// Service deciding whether a login may proceed.
///
/// # Thread Safety
///
/// The guard holds no mutable state of its own; it can be shared across
/// tasks behind an `Arc`. Consistency of concurrent attempts is whatever the
/// repository provides.
pub struct LockoutGuard<R: LoginAttemptRepository> {
    repository: Arc<R>,
    config: LockoutConfig,
    clock: Arc<dyn Clock>,
}

impl<R: LoginAttemptRepository> LockoutGuard<R> {
    pub fn new(repository: Arc<R>, config: LockoutConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record an attempt and decide what happens next.
    ///
    /// The attempt is written first, unconditionally. A success is always
    /// allowed and leaves earlier failures in place for auditing.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The account being logged into, if it is known
    /// * `ip_address` - Address of the client
    /// * `user_agent` - Optional user agent of the client
    /// * `success` - Whether the credentials were valid
    pub async fn handle_login_attempt(
        &self,
        user_id: Option<&str>,
        ip_address: &str,
        user_agent: Option<&str>,
        success: bool,
    ) -> Result<LockoutDecision, Error> {
        if !self.config.enabled {
            return Ok(LockoutDecision::allowed(self.config.max_attempts));
        }

        let now = self.clock.utc();
        self.repository
            .record_attempt(NewLoginAttempt {
                user_id: user_id.map(str::to_string),
                ip_address: ip_address.to_string(),
                user_agent: user_agent.map(str::to_string),
                success,
                attempted_at: now,
            })
            .await?;

        if success {
            return Ok(LockoutDecision::allowed(self.config.max_attempts));
        }

        let decision = self.evaluate(user_id, ip_address, now).await?;
        if !decision.allowed {
            tracing::warn!(
                user_id = user_id.unwrap_or("-"),
                ip_address = %ip_address,
                failed_attempts = decision.failed_attempts,
                "Login locked out after repeated failures"
            );
        }

        Ok(decision)
    }

    /// Read-only lockout check, for use before credentials are verified.
    pub async fn check_lockout(
        &self,
        user_id: Option<&str>,
        ip_address: &str,
    ) -> Result<LockoutDecision, Error> {
        if !self.config.enabled {
            return Ok(LockoutDecision::allowed(self.config.max_attempts));
        }

        self.evaluate(user_id, ip_address, self.clock.utc()).await
    }

    /// Flag an address that fails often or targets many accounts.
    pub async fn check_suspicious_ip(
        &self,
        ip_address: &str,
        window: Duration,
    ) -> Result<SuspiciousIpReport, Error> {
        let since = earlier(self.clock.utc(), window);
        let activity = self.repository.ip_activity(ip_address, since).await?;

        let is_suspicious = activity.failed_attempts > self.config.suspicious_failure_threshold
            || activity.distinct_users > self.config.suspicious_user_threshold;

        if is_suspicious {
            tracing::info!(
                ip_address = %ip_address,
                failed_attempts = activity.failed_attempts,
                distinct_users = activity.distinct_users,
                "Suspicious login activity"
            );
        }

        Ok(SuspiciousIpReport {
            ip_address: ip_address.to_string(),
            failed_attempts: activity.failed_attempts,
            distinct_users: activity.distinct_users,
            is_suspicious,
        })
    }

    /// Apply the configured [`StoreFailurePolicy`] to the result of a check.
    ///
    /// Only storage errors are subject to the policy; anything else is
    /// returned unchanged.
    pub fn resolve_store_failure(
        &self,
        result: Result<LockoutDecision, Error>,
    ) -> Result<LockoutDecision, Error> {
        match result {
            Err(error) if error.is_storage_error() => match self.config.on_store_failure {
                StoreFailurePolicy::FailClosed => {
                    tracing::error!(error = %error, "Attempt store failed, denying login");
                    Ok(LockoutDecision::unavailable())
                }
                StoreFailurePolicy::FailOpen => {
                    tracing::error!(error = %error, "Attempt store failed, allowing login");
                    Ok(LockoutDecision::allowed(self.config.max_attempts))
                }
                StoreFailurePolicy::Propagate => Err(error),
            },
            other => other,
        }
    }

    /// Delete attempt records older than the retention period.
    ///
    /// Records inside the attempt or lockout windows are always kept.
    pub async fn cleanup_old_attempts(&self) -> Result<u64, Error> {
        let keep = self
            .config
            .retention_period
            .max(self.config.attempt_window)
            .max(self.config.lockout_duration);
        let before = earlier(self.clock.utc(), keep);
        self.repository.cleanup_old_attempts(before).await
    }

    async fn evaluate(
        &self,
        user_id: Option<&str>,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<LockoutDecision, Error> {
        let since = earlier(now, self.config.attempt_window);

        let mut worst = AttemptStats::default();
        let mut lockout_until: Option<DateTime<Utc>> = None;

        for scope in self.scopes(user_id, ip_address) {
            let stats = self.repository.failure_stats(&scope, since).await?;
            if let Some(until) = self.lockout_until(&stats, now) {
                lockout_until = lockout_until.max(Some(until));
            }
            if stats.failed_attempts > worst.failed_attempts {
                worst = stats;
            }
        }

        if let Some(until) = lockout_until {
            return Ok(LockoutDecision::locked(worst.failed_attempts, until, now));
        }

        Ok(LockoutDecision {
            allowed: true,
            attempts_remaining: self
                .config
                .max_attempts
                .saturating_sub(worst.failed_attempts),
            failed_attempts: worst.failed_attempts,
            lockout_until: None,
            delay: progressive_delay(worst.failed_attempts),
            retry_after: None,
            message: None,
            store_unavailable: false,
        })
    }

    fn scopes(&self, user_id: Option<&str>, ip_address: &str) -> Vec<AttemptScope> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(user_id) = user_id {
            scopes.push(AttemptScope::User(user_id.to_string()));
        }
        if self.config.lock_by_ip || scopes.is_empty() {
            scopes.push(AttemptScope::Ip(ip_address.to_string()));
        }
        scopes
    }

    fn lockout_until(&self, stats: &AttemptStats, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if stats.failed_attempts < self.config.max_attempts {
            return None;
        }

        stats
            .latest_failure_at
            .map(|latest| later(latest, self.config.lockout_duration))
            .filter(|until| *until > now)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `at - duration`, clamped to the earliest representable timestamp.
fn earlier(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + duration`, clamped to the latest representable timestamp.
fn later(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        error::StorageError,
        lockout::{
            repository::InMemoryLoginAttemptRepository,
            types::{AttemptStats, IpActivity, LoginAttempt},
        },
    };
    use async_trait::async_trait;

    const IP: &str = "203.0.113.9";

    fn guard(
        config: LockoutConfig,
    ) -> (
        Arc<ManualClock>,
        Arc<InMemoryLoginAttemptRepository>,
        LockoutGuard<InMemoryLoginAttemptRepository>,
    ) {
        let clock = Arc::new(ManualClock::new());
        let repo = Arc::new(InMemoryLoginAttemptRepository::new());
        let guard = LockoutGuard::new(repo.clone(), config, clock.clone());
        (clock, repo, guard)
    }

    /// Repository whose backing store is down.
    struct UnavailableRepository;

    #[async_trait]
    impl LoginAttemptRepository for UnavailableRepository {
        async fn record_attempt(&self, _attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
            Err(StorageError::Unavailable("connection refused".to_string()).into())
        }

        async fn failure_stats(
            &self,
            _scope: &AttemptScope,
            _since: DateTime<Utc>,
        ) -> Result<AttemptStats, Error> {
            Err(StorageError::Unavailable("connection refused".to_string()).into())
        }

        async fn ip_activity(
            &self,
            _ip_address: &str,
            _since: DateTime<Utc>,
        ) -> Result<IpActivity, Error> {
            Err(StorageError::Unavailable("connection refused".to_string()).into())
        }

        async fn cleanup_old_attempts(&self, _before: DateTime<Utc>) -> Result<u64, Error> {
            Err(StorageError::Unavailable("connection refused".to_string()).into())
        }
    }

    fn unavailable_guard(policy: StoreFailurePolicy) -> LockoutGuard<UnavailableRepository> {
        LockoutGuard::new(
            Arc::new(UnavailableRepository),
            LockoutConfig {
                on_store_failure: policy,
                ..Default::default()
            },
            Arc::new(ManualClock::new()),
        )
    }

    #[tokio::test]
    async fn test_every_attempt_is_recorded() {
        let (_clock, repo, guard) = guard(LockoutConfig::default());

        guard
            .handle_login_attempt(Some("u1"), IP, Some("curl/8"), false)
            .await
            .unwrap();
        guard
            .handle_login_attempt(Some("u1"), IP, None, true)
            .await
            .unwrap();

        let attempts = repo.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].user_agent.as_deref(), Some("curl/8"));
        assert!(attempts[1].success);
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts() {
        let (_clock, _repo, guard) = guard(LockoutConfig::default());

        for expected_remaining in [4, 3, 2, 1] {
            let decision = guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.attempts_remaining, expected_remaining);
        }

        let fifth = guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await
            .unwrap();
        assert!(!fifth.allowed);

        let sixth = guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await
            .unwrap();
        assert!(!sixth.allowed);
        assert_eq!(sixth.attempts_remaining, 0);
        let until = sixth.lockout_until.unwrap();
        assert!(until > guard.clock.utc());
        assert!(sixth.message.unwrap().contains("30 minutes"));
    }

    #[tokio::test]
    async fn test_success_is_always_allowed() {
        let (_clock, repo, guard) = guard(LockoutConfig::default());
        for _ in 0..7 {
            guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
        }

        let decision = guard
            .handle_login_attempt(Some("u1"), IP, None, true)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.attempts_remaining, 5);
        assert_eq!(decision.delay, Duration::ZERO);

        // Failures stay in the log.
        assert_eq!(repo.attempts().iter().filter(|a| !a.success).count(), 7);
    }

    #[tokio::test]
    async fn test_progressive_delay_grows_with_failures() {
        let (_clock, _repo, guard) = guard(LockoutConfig {
            max_attempts: 10,
            ..Default::default()
        });

        let mut delays = Vec::new();
        for _ in 0..7 {
            let decision = guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
            delays.push(decision.delay_ms());
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 16000, 16000]);
    }

    #[tokio::test]
    async fn test_lockout_expires_after_duration() {
        let (clock, _repo, guard) = guard(LockoutConfig::default());
        for _ in 0..5 {
            guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
        }
        assert!(!guard.check_lockout(Some("u1"), IP).await.unwrap().allowed);

        clock.advance(Duration::from_secs(31 * 60));

        let status = guard.check_lockout(Some("u1"), IP).await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_rotating_ip_does_not_bypass_user_lockout() {
        let (_clock, _repo, guard) = guard(LockoutConfig::default());
        for i in 0..5 {
            guard
                .handle_login_attempt(Some("victim"), &format!("10.0.0.{i}"), None, false)
                .await
                .unwrap();
        }

        let status = guard
            .check_lockout(Some("victim"), "10.0.0.99")
            .await
            .unwrap();
        assert!(!status.allowed);
    }

    #[tokio::test]
    async fn test_rotating_users_does_not_bypass_ip_lockout() {
        let (_clock, _repo, guard) = guard(LockoutConfig::default());
        for i in 0..5 {
            guard
                .handle_login_attempt(Some(&format!("user{i}")), IP, None, false)
                .await
                .unwrap();
        }

        assert!(!guard.check_lockout(Some("fresh"), IP).await.unwrap().allowed);
        assert!(!guard.check_lockout(None, IP).await.unwrap().allowed);
        assert!(
            guard
                .check_lockout(Some("fresh"), "198.51.100.1")
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn test_ip_axis_can_be_disabled() {
        let (_clock, _repo, guard) = guard(LockoutConfig {
            lock_by_ip: false,
            ..Default::default()
        });
        for i in 0..5 {
            guard
                .handle_login_attempt(Some(&format!("user{i}")), IP, None, false)
                .await
                .unwrap();
        }

        assert!(guard.check_lockout(Some("fresh"), IP).await.unwrap().allowed);
        // Unknown users are still counted by address.
        assert!(!guard.check_lockout(None, IP).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_disabled_guard_records_nothing() {
        let (_clock, repo, guard) = guard(LockoutConfig::disabled());
        for _ in 0..10 {
            let decision = guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
            assert!(decision.allowed);
        }
        assert!(repo.attempts().is_empty());
        assert!(!guard.is_enabled());
    }

    #[tokio::test]
    async fn test_suspicious_ip_thresholds() {
        let (_clock, _repo, guard) = guard(LockoutConfig {
            max_attempts: 100,
            ..Default::default()
        });

        for user in ["a", "b", "c"] {
            guard
                .handle_login_attempt(Some(user), IP, None, false)
                .await
                .unwrap();
        }
        let report = guard
            .check_suspicious_ip(IP, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(!report.is_suspicious);
        assert_eq!(report.distinct_users, 3);

        guard
            .handle_login_attempt(Some("d"), IP, None, false)
            .await
            .unwrap();
        let report = guard
            .check_suspicious_ip(IP, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(report.is_suspicious);
    }

    #[tokio::test]
    async fn test_suspicious_ip_by_failure_count() {
        let (_clock, _repo, guard) = guard(LockoutConfig {
            max_attempts: 100,
            ..Default::default()
        });
        for _ in 0..11 {
            guard
                .handle_login_attempt(None, IP, None, false)
                .await
                .unwrap();
        }
        let report = guard
            .check_suspicious_ip(IP, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(report.failed_attempts, 11);
        assert_eq!(report.distinct_users, 0);
        assert!(report.is_suspicious);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let guard = unavailable_guard(StoreFailurePolicy::FailClosed);
        let err = guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_fail_closed_policy_denies() {
        let guard = unavailable_guard(StoreFailurePolicy::FailClosed);
        let result = guard.check_lockout(Some("u1"), IP).await;
        let decision = guard.resolve_store_failure(result).unwrap();
        assert!(!decision.allowed);
        assert!(decision.store_unavailable);
        assert!(decision.message.is_some());
    }

    #[tokio::test]
    async fn test_fail_open_policy_allows() {
        let guard = unavailable_guard(StoreFailurePolicy::FailOpen);
        let result = guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await;
        let decision = guard.resolve_store_failure(result).unwrap();
        assert!(decision.allowed);
        assert!(!decision.store_unavailable);
    }

    #[tokio::test]
    async fn test_propagate_policy_returns_error() {
        let guard = unavailable_guard(StoreFailurePolicy::Propagate);
        let result = guard.check_lockout(None, IP).await;
        assert!(guard.resolve_store_failure(result).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_records_within_retention() {
        let (clock, repo, guard) = guard(LockoutConfig {
            retention_period: Duration::from_secs(24 * 3600),
            ..Default::default()
        });
        guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(25 * 3600));
        guard
            .handle_login_attempt(Some("u1"), IP, None, false)
            .await
            .unwrap();

        assert_eq!(guard.cleanup_old_attempts().await.unwrap(), 1);
        assert_eq!(repo.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_windows_clamp_instead_of_overflowing() {
        const AGES: Duration = Duration::from_secs(400_000 * 365 * 24 * 3600);

        let (clock, repo, guard) = guard(LockoutConfig {
            attempt_window: Duration::MAX,
            lockout_duration: AGES,
            retention_period: AGES,
            max_attempts: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            guard
                .handle_login_attempt(Some("u1"), IP, None, false)
                .await
                .unwrap();
        }
        clock.advance(Duration::from_secs(365 * 24 * 3600));

        let status = guard.check_lockout(Some("u1"), IP).await.unwrap();
        assert!(!status.allowed);
        assert_eq!(status.lockout_until, Some(DateTime::<Utc>::MAX_UTC));

        let report = guard.check_suspicious_ip(IP, Duration::MAX).await.unwrap();
        assert_eq!(report.failed_attempts, 2);

        assert_eq!(guard.cleanup_old_attempts().await.unwrap(), 0);
        assert_eq!(repo.attempts().len(), 2);
    }
}

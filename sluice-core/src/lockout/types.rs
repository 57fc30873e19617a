use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Escalating delay, in milliseconds, indexed by the number of recent failures.
pub const PROGRESSIVE_DELAYS_MS: [u64; 6] = [0, 1_000, 2_000, 4_000, 8_000, 16_000];

/// The delay a caller should wait before answering a failed attempt.
///
/// Counts beyond the table are clamped to its last entry.
pub fn progressive_delay(failed_attempts: u32) -> Duration {
    let index = (failed_attempts as usize).min(PROGRESSIVE_DELAYS_MS.len() - 1);
    Duration::from_millis(PROGRESSIVE_DELAYS_MS[index])
}

/// One row of the append-only login attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: i64,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Insert payload for [`LoginAttempt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLoginAttempt {
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

/// An axis along which failures are counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttemptScope {
    User(String),
    Ip(String),
}

impl AttemptScope {
    pub fn matches(&self, attempt: &LoginAttempt) -> bool {
        match self {
            AttemptScope::User(user_id) => attempt.user_id.as_deref() == Some(user_id.as_str()),
            AttemptScope::Ip(ip_address) => attempt.ip_address == *ip_address,
        }
    }
}

/// Failure aggregate for one scope inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    pub failed_attempts: u32,
    pub latest_failure_at: Option<DateTime<Utc>>,
}

/// Failure aggregate for one address inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpActivity {
    pub failed_attempts: u32,
    /// Distinct user ids targeted by failed attempts.
    pub distinct_users: u32,
}

/// What the caller of a login endpoint should do next. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutDecision {
    pub allowed: bool,
    pub attempts_remaining: u32,
    pub failed_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    /// How long to wait before responding.
    pub delay: Duration,
    pub retry_after: Option<Duration>,
    pub message: Option<String>,
    /// Set when the login was refused because the attempt store could not
    /// be consulted, not because of the caller's attempts.
    pub store_unavailable: bool,
}

impl LockoutDecision {
    pub fn allowed(max_attempts: u32) -> Self {
        Self {
            allowed: true,
            attempts_remaining: max_attempts,
            failed_attempts: 0,
            lockout_until: None,
            delay: Duration::ZERO,
            retry_after: None,
            message: None,
            store_unavailable: false,
        }
    }

    pub(crate) fn locked(
        failed_attempts: u32,
        lockout_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let retry_after = (lockout_until - now).to_std().unwrap_or_default();
        let minutes = retry_after.as_secs().div_ceil(60).max(1);
        Self {
            allowed: false,
            attempts_remaining: 0,
            failed_attempts,
            lockout_until: Some(lockout_until),
            delay: Duration::ZERO,
            retry_after: Some(retry_after),
            message: Some(format!(
                "Too many failed login attempts. Try again in {minutes} minute{}.",
                if minutes == 1 { "" } else { "s" }
            )),
            store_unavailable: false,
        }
    }

    /// Denial used when the attempt store cannot be consulted and the policy fails closed.
    pub fn unavailable() -> Self {
        Self {
            allowed: false,
            attempts_remaining: 0,
            failed_attempts: 0,
            lockout_until: None,
            delay: Duration::ZERO,
            retry_after: None,
            message: Some("Login is temporarily unavailable. Please try again later.".to_string()),
            store_unavailable: true,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }

    /// Seconds until the lockout ends, rounded up.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after
            .map(|retry| retry.as_secs().saturating_add(u64::from(retry.subsec_nanos() > 0)))
    }
}

/// Informational signal about an address. Never blocks by itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousIpReport {
    pub ip_address: String,
    pub failed_attempts: u32,
    pub distinct_users: u32,
    pub is_suspicious: bool,
}

/// What to do when the attempt store cannot be read or written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Deny the login.
    #[default]
    FailClosed,
    /// Allow the login without lockout protection.
    FailOpen,
    /// Hand the error back to the caller.
    Propagate,
}

/// Lockout behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub enabled: bool,
    /// Failures within `attempt_window` that trigger a lockout.
    pub max_attempts: u32,
    pub attempt_window: Duration,
    /// Measured from the most recent failure.
    pub lockout_duration: Duration,
    /// Also count failures per address, not only per user.
    pub lock_by_ip: bool,
    /// How long attempt records are kept before the sweeper deletes them.
    pub retention_period: Duration,
    /// An address with more failures than this in the window is suspicious.
    pub suspicious_failure_threshold: u32,
    /// An address targeting more distinct users than this is suspicious.
    pub suspicious_user_threshold: u32,
    pub on_store_failure: StoreFailurePolicy,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            attempt_window: Duration::from_secs(30 * 60),
            lockout_duration: Duration::from_secs(30 * 60),
            lock_by_ip: true,
            retention_period: Duration::from_secs(90 * 24 * 3600),
            suspicious_failure_threshold: 10,
            suspicious_user_threshold: 3,
            on_store_failure: StoreFailurePolicy::FailClosed,
        }
    }
}

impl LockoutConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

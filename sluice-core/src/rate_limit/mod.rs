//! Fixed-window rate limiting.
//!
//! Each identifier owns one counter and the instant its current window began.
//! The first request after a window has run out starts a new window with a
//! count of one; requests beyond `max_requests` inside a window are denied
//! until it ends.
//!
//! # Example
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//! use sluice_core::{RateLimitConfig, RateLimiter, SystemClock};
//!
//! let limiter = RateLimiter::new(Arc::new(SystemClock));
//! let config = RateLimitConfig::new(3, Duration::from_secs(60));
//!
//! let decision = limiter.check("user-42", &config).unwrap();
//! assert!(decision.success);
//! assert_eq!(decision.remaining, 2);
//! ```

pub mod identifier;
pub mod profile;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;

use crate::{Error, clock::Clock};

pub use identifier::{RequestIdentifier, request_identifier};
pub use profile::{RateLimitConfig, RateLimitProfile};

/// Counter state for one identifier.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }
}

/// The result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window ends. Only set on denial.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn admitted(limit: u32, remaining: u32) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            retry_after: None,
        }
    }

    fn denied(limit: u32, retry_after: Duration) -> Self {
        Self {
            success: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// Retry hint in whole seconds, rounded up and never below one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|retry| {
            let secs = retry.as_secs().saturating_add(u64::from(retry.subsec_nanos() > 0));
            secs.max(1)
        })
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after
            .map(|retry| u64::try_from(retry.as_millis()).unwrap_or(u64::MAX))
    }
}

/// In-process fixed-window rate limiter.
///
/// # Thread Safety
///
/// Entries live in a sharded map; the read-increment-decide sequence for an
/// identifier runs under that identifier's shard lock, so concurrent checks
/// never lose an increment. Limits are per process, not global.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    default_profile: RateLimitProfile,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_default_profile(clock, RateLimitProfile::default())
    }

    pub fn with_default_profile(clock: Arc<dyn Clock>, default_profile: RateLimitProfile) -> Self {
        Self {
            entries: DashMap::new(),
            default_profile,
            clock,
        }
    }

    pub fn default_profile(&self) -> RateLimitProfile {
        self.default_profile
    }

    /// Count a request for `identifier` and decide whether to admit it.
    ///
    /// Being over the limit is a normal outcome reported through
    /// `success = false`. The only error is an invalid `config`.
    pub fn check(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision, Error> {
        config.validate()?;

        let max = config.max_requests;
        let now = self.clock.instant();

        let decision = match self.entries.entry(identifier.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry::fresh(now));
                RateLimitDecision::admitted(max, max - 1)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now.saturating_duration_since(entry.window_start) >= config.window {
                    *entry = RateLimitEntry::fresh(now);
                    RateLimitDecision::admitted(max, max - 1)
                } else {
                    entry.count = entry.count.saturating_add(1);
                    if entry.count <= max {
                        RateLimitDecision::admitted(max, max - entry.count)
                    } else {
                        let elapsed = now.saturating_duration_since(entry.window_start);
                        RateLimitDecision::denied(max, config.window.saturating_sub(elapsed))
                    }
                }
            }
        };

        if !decision.success {
            tracing::debug!(
                identifier = %identifier,
                limit = max,
                retry_after_ms = decision.retry_after_ms(),
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Check against the limiter's default profile.
    pub fn check_default(&self, identifier: &str) -> Result<RateLimitDecision, Error> {
        self.check(identifier, &self.default_profile.config())
    }

    pub fn check_profile(
        &self,
        identifier: &str,
        profile: RateLimitProfile,
    ) -> Result<RateLimitDecision, Error> {
        self.check(identifier, &profile.config())
    }

    /// Current entry for an identifier, if any.
    pub fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries.get(identifier).map(|entry| *entry)
    }

    /// Remove one identifier's counter. Returns whether it existed.
    pub fn clear(&self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose window started at least `max_window` ago.
    ///
    /// `max_window` must be at least the longest window any caller checks
    /// with, otherwise live windows would be reset early.
    pub fn sweep(&self, max_window: Duration) -> usize {
        let now = self.clock.instant();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) < max_window);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            tracing::info!(count = removed, "Swept expired rate limit entries");
        }

        removed
    }
}

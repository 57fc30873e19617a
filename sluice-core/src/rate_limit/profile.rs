use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Limits applied by a single [`check`](super::RateLimiter::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub max_requests: u32,
    /// Length of a fixed window.
    pub window: Duration,
}

impl RateLimitConfig {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_requests == 0 {
            return Err(ValidationError::ZeroMaxRequests);
        }
        if self.window.is_zero() {
            return Err(ValidationError::ZeroWindow);
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitProfile::Api.config()
    }
}

/// The static catalogue of named limits.
///
/// Auth and write paths get tight budgets; read paths get a lenient one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitProfile {
    #[default]
    Api,
    Auth,
    PostCreate,
    CommentFlag,
    ViewTracking,
    Read,
}

impl RateLimitProfile {
    pub const ALL: [RateLimitProfile; 6] = [
        RateLimitProfile::Api,
        RateLimitProfile::Auth,
        RateLimitProfile::PostCreate,
        RateLimitProfile::CommentFlag,
        RateLimitProfile::ViewTracking,
        RateLimitProfile::Read,
    ];

    pub const fn config(self) -> RateLimitConfig {
        match self {
            RateLimitProfile::Api => RateLimitConfig::new(100, Duration::from_secs(60)),
            RateLimitProfile::Auth => RateLimitConfig::new(5, Duration::from_secs(15 * 60)),
            RateLimitProfile::PostCreate => RateLimitConfig::new(10, Duration::from_secs(3600)),
            RateLimitProfile::CommentFlag => RateLimitConfig::new(10, Duration::from_secs(3600)),
            RateLimitProfile::ViewTracking => RateLimitConfig::new(60, Duration::from_secs(60)),
            RateLimitProfile::Read => RateLimitConfig::new(300, Duration::from_secs(60)),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RateLimitProfile::Api => "api",
            RateLimitProfile::Auth => "auth",
            RateLimitProfile::PostCreate => "post_create",
            RateLimitProfile::CommentFlag => "comment_flag",
            RateLimitProfile::ViewTracking => "view_tracking",
            RateLimitProfile::Read => "read",
        }
    }

    /// The longest window in the catalogue; entries idle for longer can be swept.
    pub fn longest_window() -> Duration {
        Self::ALL
            .iter()
            .map(|profile| profile.config().window)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_is_valid() {
        for profile in RateLimitProfile::ALL {
            assert!(profile.config().validate().is_ok(), "{}", profile.name());
        }
    }

    #[test]
    fn test_auth_is_stricter_than_read() {
        let auth = RateLimitProfile::Auth.config();
        let read = RateLimitProfile::Read.config();
        assert!(auth.max_requests < read.max_requests);
        assert!(auth.window > read.window);
    }

    #[test]
    fn test_default_is_api_profile() {
        assert_eq!(RateLimitConfig::default(), RateLimitProfile::Api.config());
        assert_eq!(RateLimitProfile::default(), RateLimitProfile::Api);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(matches!(
            RateLimitConfig::new(0, Duration::from_secs(1)).validate(),
            Err(ValidationError::ZeroMaxRequests)
        ));
        assert!(matches!(
            RateLimitConfig::new(1, Duration::ZERO).validate(),
            Err(ValidationError::ZeroWindow)
        ));
    }

    #[test]
    fn test_longest_window() {
        assert_eq!(RateLimitProfile::longest_window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_profile_serde_names() {
        let json = serde_json::to_string(&RateLimitProfile::PostCreate).unwrap();
        assert_eq!(json, "\"post_create\"");
        let profile: RateLimitProfile = serde_json::from_str("\"view_tracking\"").unwrap();
        assert_eq!(profile, RateLimitProfile::ViewTracking);
    }
}

//! Progressive delay and lockout for authentication attempts.

pub mod guard;
pub mod repository;
pub mod types;

pub use guard::LockoutGuard;
pub use repository::{InMemoryLoginAttemptRepository, LoginAttemptRepository};
pub use types::{
    AttemptScope, AttemptStats, IpActivity, LockoutConfig, LockoutDecision, LoginAttempt,
    NewLoginAttempt, PROGRESSIVE_DELAYS_MS, StoreFailurePolicy, SuspiciousIpReport,
    progressive_delay,
};

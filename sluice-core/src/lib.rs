//! Core functionality for the sluice project
//!
//! This crate contains the in-process admission control and request
//! deduplication primitives:
//!
//! - [`RateLimiter`]: fixed-window counters keyed by request identifier
//! - [`LockoutGuard`]: progressive delay and lockout over a login attempt log
//! - [`RequestCoalescer`]: one shared execution for concurrent identical fetches
//! - [`BatchLoader`]: single-key loads grouped into batched fetches
//!
//! All state is process-local. Components are plain values constructed once
//! and shared by handle; none of them relies on globals.
//!
//! Storage backends implement [`LoginAttemptRepository`] to persist the
//! attempt log used by the lockout guard.
pub mod batch;
pub mod clock;
pub mod coalesce;
pub mod error;
pub mod lockout;
pub mod rate_limit;

pub use batch::{BatchConfig, BatchFn, BatchLoader, Scheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::{Coalesced, CoalescerConfig, RequestCoalescer};
pub use error::{Error, LoadError, StorageError, ValidationError};
pub use lockout::{
    InMemoryLoginAttemptRepository, LockoutConfig, LockoutDecision, LockoutGuard,
    LoginAttemptRepository, StoreFailurePolicy,
};
pub use rate_limit::{
    RateLimitConfig, RateLimitDecision, RateLimitProfile, RateLimiter, RequestIdentifier,
};

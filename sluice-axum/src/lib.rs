//! # Sluice Axum Integration
//!
//! Middleware and extractors that put sluice admission control in front of
//! axum handlers.
//!
//! - [`rate_limit_middleware`] counts each request under its
//!   [`RequestIdentifier`](sluice_core::RequestIdentifier) and answers
//!   `429 Too Many Requests` with a `Retry-After` header once the budget is
//!   spent. Admitted responses carry `X-RateLimit-Limit` and
//!   `X-RateLimit-Remaining`.
//! - [`ClientInfo`] extracts the caller's user id, address and user agent.
//! - [`ensure_login_allowed`] maps a denied
//!   [`LockoutDecision`](sluice_core::LockoutDecision) onto the same `429`
//!   response shape, or onto a `500` when the attempt store was unreachable.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{Router, middleware, routing::get};
//! use sluice_axum::{RateLimitState, rate_limit_middleware};
//! use sluice_core::{RateLimitProfile, RateLimiter, SystemClock};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Arc::new(RateLimiter::new(Arc::new(SystemClock)));
//!
//!     let app = Router::new()
//!         .route("/api/items", get(|| async { "items" }))
//!         .layer(middleware::from_fn_with_state(
//!             RateLimitState::new(limiter, RateLimitProfile::Api),
//!             rate_limit_middleware,
//!         ));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

mod error;
mod extractors;
mod middleware;

pub use error::{AdmissionError, DEFAULT_DENIAL_MESSAGE, Result};
pub use extractors::{AuthenticatedUserId, ClientInfo, FORWARDED_FOR_HEADER};
pub use middleware::{
    RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RateLimitState, ensure_login_allowed,
    rate_limit_middleware,
};

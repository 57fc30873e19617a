use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sluice_core::{LockoutDecision, RateLimitConfig, RateLimitProfile, RateLimiter};

use crate::{
    error::{AdmissionError, DEFAULT_DENIAL_MESSAGE},
    extractors::ClientInfo,
};

pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");

/// State for [`rate_limit_middleware`]: which limiter, and which limit to apply.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub config: RateLimitConfig,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, profile: RateLimitProfile) -> Self {
        Self {
            limiter,
            config: profile.config(),
        }
    }

    pub fn with_config(limiter: Arc<RateLimiter>, config: RateLimitConfig) -> Self {
        Self { limiter, config }
    }
}

/// Count the request against its identifier and reject it with `429` once
/// the window's budget is spent.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// use axum::{Router, middleware, routing::post};
/// use sluice_axum::{RateLimitState, rate_limit_middleware};
/// use sluice_core::{RateLimitProfile, RateLimiter, SystemClock};
///
/// let limiter = Arc::new(RateLimiter::new(Arc::new(SystemClock)));
/// let state = RateLimitState::new(limiter, RateLimitProfile::PostCreate);
///
/// let app: Router = Router::new()
///     .route("/posts", post(|| async { "created" }))
///     .layer(middleware::from_fn_with_state(state, rate_limit_middleware));
/// ```
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    client: ClientInfo,
    request: Request,
    next: Next,
) -> Response {
    let decision = match state
        .limiter
        .check(client.identifier.as_str(), &state.config)
    {
        Ok(decision) => decision,
        Err(e) => return AdmissionError::from(e).into_response(),
    };

    if !decision.success {
        tracing::debug!(
            identifier = %client.identifier,
            path = %request.uri().path(),
            "Request rejected by rate limit"
        );
        let mut response = AdmissionError::TooManyRequests {
            retry_after_secs: decision.retry_after_secs(),
            message: DEFAULT_DENIAL_MESSAGE.to_string(),
        }
        .into_response();
        response
            .headers_mut()
            .insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
        response
            .headers_mut()
            .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(0u32));
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
    response
}

/// Turn a denied lockout decision into a rejection.
///
/// A lockout becomes a `429`. A denial caused by an unreachable attempt
/// store becomes a `500`, since the caller did nothing to earn it.
///
/// Login handlers call this after consulting the guard:
///
/// ```rust,ignore
/// let status = guard.check_lockout(Some(&user_id), client.ip_or_unknown()).await;
/// ensure_login_allowed(&guard.resolve_store_failure(status)?)?;
/// ```
pub fn ensure_login_allowed(decision: &LockoutDecision) -> Result<(), AdmissionError> {
    if decision.allowed {
        return Ok(());
    }

    if decision.store_unavailable {
        return Err(AdmissionError::Internal(
            "attempt store unavailable, login refused".to_string(),
        ));
    }

    Err(AdmissionError::TooManyRequests {
        retry_after_secs: decision.retry_after_seconds(),
        message: decision
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_DENIAL_MESSAGE.to_string()),
    })
}

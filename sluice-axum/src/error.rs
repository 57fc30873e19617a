use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_DENIAL_MESSAGE: &str = "Too many requests. Please try again later.";

/// Rejection produced by the admission layer.
///
/// A denial and a failure to decide are different outcomes: the first is a
/// `429`, the second a `500`.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("{message}")]
    TooManyRequests {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        AdmissionError::TooManyRequests {
            retry_after_secs,
            message: DEFAULT_DENIAL_MESSAGE.to_string(),
        }
    }
}

impl From<sluice_core::Error> for AdmissionError {
    fn from(err: sluice_core::Error) -> Self {
        AdmissionError::Internal(err.to_string())
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::TooManyRequests {
                retry_after_secs,
                message,
            } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = Json(json!({
                    "error": message,
                    "code": status.as_u16(),
                    "retry_after": retry_after_secs,
                }));

                let mut response = (status, body).into_response();
                if let Some(secs) = retry_after_secs {
                    response
                        .headers_mut()
                        .insert(RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
            AdmissionError::Internal(msg) => {
                tracing::error!(error = %msg, "Admission check failed");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                let body = Json(json!({
                    "error": "Internal server error",
                    "code": status.as_u16()
                }));
                (status, body).into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AdmissionError>;

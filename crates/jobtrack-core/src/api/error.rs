use serde::Deserialize;
use thiserror::Error;

use crate::error::FieldError;

/// Transport-level failure of a single HTTP exchange.
///
/// These never leave the crate's session layer directly; they are folded
/// into [`crate::SessionError`] at the authorizer and bridge boundaries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body shape returned by the backend for rejected input.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<FieldError>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Prefer the backend's `message` field over the raw body.
    fn message_of(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 | 422 => {
                let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
                ApiError::BadRequest {
                    message: parsed.message.unwrap_or_else(|| Self::truncate_body(body)),
                    errors: parsed.errors,
                }
            }
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(Self::message_of(body)),
            404 => ApiError::NotFound(Self::message_of(body)),
            409 => ApiError::Conflict(Self::message_of(body)),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(Self::truncate_body(body)),
            _ => ApiError::InvalidResponse(format!(
                "Status {}: {}",
                status,
                Self::truncate_body(body)
            )),
        }
    }

    /// True for failures worth retrying later rather than correcting input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_)
                | ApiError::Timeout
                | ApiError::RateLimited
                | ApiError::ServerError(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

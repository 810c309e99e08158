//! Session error taxonomy.
//!
//! Everything the session layer reports to callers is one of the
//! [`SessionError`] kinds. Transport failures ([`ApiError`]) are translated
//! here, with the operation that produced them deciding the kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ApiError;

/// A per-field validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Validation failed: {}", format_fields(.0))]
    ValidationFailed(Vec<FieldError>),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("External sign-in failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),
}

fn format_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The backend exchange an [`ApiError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOperation {
    Login,
    Register,
    Refresh,
    Logout,
    ProviderExchange,
    /// An ordinary authorized API call.
    Request,
}

impl SessionError {
    /// Translate a transport error into the session taxonomy.
    pub fn from_api(op: AuthOperation, err: ApiError) -> Self {
        // Any failure while refreshing ends the session.
        if op == AuthOperation::Refresh {
            return SessionError::SessionExpired;
        }
        if err.is_transient() {
            return SessionError::NetworkFailure(err.to_string());
        }

        match (op, err) {
            (AuthOperation::ProviderExchange, err) => SessionError::ProviderAuthFailed(err.to_string()),
            (AuthOperation::Login, ApiError::Unauthorized)
            | (AuthOperation::Login, ApiError::AccessDenied(_))
            | (AuthOperation::Login, ApiError::NotFound(_)) => {
                SessionError::InvalidCredentials("Invalid email or password".to_string())
            }
            (AuthOperation::Register, ApiError::Conflict(message)) => {
                SessionError::InvalidCredentials(message)
            }
            (AuthOperation::Login | AuthOperation::Register, ApiError::BadRequest { message, errors }) => {
                if errors.is_empty() {
                    SessionError::ValidationFailed(vec![FieldError::new("form", message)])
                } else {
                    SessionError::ValidationFailed(errors)
                }
            }
            (AuthOperation::Request, ApiError::Unauthorized) => SessionError::SessionExpired,
            (_, err) => SessionError::NetworkFailure(err.to_string()),
        }
    }

    /// Whether this error forces the session to end.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, SessionError::SessionExpired)
    }

    /// Whether the user can fix this by changing their input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidCredentials(_) | SessionError::ValidationFailed(_)
        )
    }
}

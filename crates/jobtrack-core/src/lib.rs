//! Core library for jobtrack.
//!
//! Provides the client-side session lifecycle used by every jobtrack
//! front end: credential storage, single-flight token refresh, request
//! authorization with refresh-then-retry, route guards, and the OAuth
//! sign-in bridge.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, RequestAuthorizer};
pub use auth::{
    Credential, CredentialStore, GuardDecision, LifecycleState, OAuthBridge, RefreshCoordinator,
    RouteGuard, SessionController, SessionState,
};
pub use config::Config;
pub use error::{AuthOperation, FieldError, SessionError};

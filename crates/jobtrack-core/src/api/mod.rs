//! REST API client module for the jobtrack backend.
//!
//! This module provides the transport for outbound calls, the
//! `RequestAuthorizer` that attaches bearer tokens and replays requests
//! after a refresh, the `AuthBackend` client for the authentication
//! endpoints, and the typed `ApiClient` for application data.

pub mod authorizer;
pub mod backend;
pub mod client;
pub mod error;
pub mod transport;

pub use authorizer::RequestAuthorizer;
pub use backend::{AuthBackend, HttpAuthBackend, LoginRequest, RegisterRequest};
pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

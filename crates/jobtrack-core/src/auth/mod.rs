//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `CredentialStore`: the single owner of the current credential, with
//!   change notifications
//! - `RefreshCoordinator`: single-flight token refresh shared by all callers
//! - `RouteGuard`: navigation decisions derived from the live session
//! - `OAuthBridge`: external identity provider sign-in
//! - `SessionController`: login, registration, logout and startup restore
//!
//! Access tokens live in memory only; the refresh token is kept in the OS
//! keychain so a session survives restarts.

pub mod controller;
pub mod credential;
pub mod guard;
pub mod oauth;
pub mod refresh;
pub mod store;
pub mod validation;
pub mod vault;

pub use controller::{LifecycleState, SessionController};
pub use credential::{Credential, SessionState};
pub use guard::{GuardDecision, RouteGuard};
pub use oauth::{ExternalLoginRequest, OAuthBridge};
pub use refresh::{RefreshCoordinator, RefreshHandle};
pub use store::{CredentialStore, Subscription};
pub use vault::{KeyringVault, MemoryVault, RefreshTokenVault};

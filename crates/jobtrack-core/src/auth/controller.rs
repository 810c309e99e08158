//! Session lifecycle orchestration.
//!
//! The controller is the only entry point the presentation layer uses to
//! change who is logged in. It owns the wiring between the credential
//! store, refresh coordinator, request authorizer, route guard and OAuth
//! bridge, and is installed process-wide with [`init`] / [`teardown`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::credential::{Credential, SessionState};
use super::guard::RouteGuard;
use super::oauth::{ExternalLoginRequest, OAuthBridge};
use super::refresh::RefreshCoordinator;
use super::store::CredentialStore;
use super::validation::{validate_login, validate_registration};
use super::vault::{KeyringVault, RefreshTokenVault};
use crate::api::backend::{AuthBackend, HttpAuthBackend, LoginRequest, RegisterRequest};
use crate::api::transport::{ReqwestTransport, Transport};
use crate::api::RequestAuthorizer;
use crate::config::Config;
use crate::error::{AuthOperation, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum LifecycleState {
    Anonymous,
    Authenticating,
    Authenticated,
    /// The session ended because refresh failed; cleared once the user has
    /// been told (see [`SessionController::take_session_expired_notice`]).
    RefreshFailed,
}

pub struct SessionController {
    config: Config,
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    coordinator: Arc<RefreshCoordinator>,
    authorizer: Arc<RequestAuthorizer>,
    guard: RouteGuard,
    oauth: OAuthBridge,
    state: Arc<Mutex<LifecycleState>>,
    expired_notice: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionController {
    pub fn new(
        config: Config,
        backend: Arc<dyn AuthBackend>,
        transport: Arc<dyn Transport>,
        vault: Arc<dyn RefreshTokenVault>,
    ) -> Arc<Self> {
        let store = Arc::new(CredentialStore::new(vault, config.clock_skew()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            config.refresh_timeout(),
        ));
        let authorizer = Arc::new(RequestAuthorizer::new(
            Arc::clone(&store),
            Arc::clone(&coordinator),
            transport,
        ));
        let guard = RouteGuard::new(Arc::clone(&store));
        let oauth = OAuthBridge::new(Arc::clone(&backend), &config);

        let state = Arc::new(Mutex::new(LifecycleState::Anonymous));
        let expired_notice = Arc::new(AtomicBool::new(false));

        {
            let state = Arc::clone(&state);
            let notice = Arc::clone(&expired_notice);
            coordinator.on_session_expired(move || {
                // A restore or login in progress settles its own state.
                let mut current = lock(&state);
                if *current == LifecycleState::Authenticated {
                    info!("Session expired, user must log in again");
                    notice.store(true, Ordering::SeqCst);
                    *current = LifecycleState::RefreshFailed;
                }
            });
        }

        Arc::new(Self {
            config,
            store,
            backend,
            coordinator,
            authorizer,
            guard,
            oauth,
            state,
            expired_notice,
        })
    }

    /// Production wiring: HTTP backend, reqwest transport, OS keychain vault.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let backend = HttpAuthBackend::new(&config).context("Failed to build auth client")?;
        let transport =
            ReqwestTransport::new(config.request_timeout()).context("Failed to build API client")?;
        Ok(Self::new(
            config,
            Arc::new(backend),
            Arc::new(transport),
            Arc::new(KeyringVault::new()),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn authorizer(&self) -> &Arc<RequestAuthorizer> {
        &self.authorizer
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    /// Lifecycle state. Settled states are re-checked against the store, so
    /// a token that expired (or was replaced) outside the controller is
    /// reflected here too.
    pub fn state(&self) -> LifecycleState {
        let mut state = lock(&self.state);
        let authenticated = self.store.get().is_authenticated();
        let reconciled = match *state {
            LifecycleState::Authenticated | LifecycleState::Anonymous if authenticated => {
                LifecycleState::Authenticated
            }
            LifecycleState::Authenticated | LifecycleState::Anonymous => LifecycleState::Anonymous,
            in_progress => in_progress,
        };
        if *state != reconciled {
            debug!(from = ?*state, to = ?reconciled, "Lifecycle reconciled with store");
            *state = reconciled;
        }
        reconciled
    }

    /// Current derived session state.
    pub fn session(&self) -> SessionState {
        self.store.get()
    }

    /// True exactly once after a session ended because refresh failed.
    pub fn take_session_expired_notice(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == LifecycleState::RefreshFailed {
            *state = LifecycleState::Anonymous;
        }
        self.expired_notice.swap(false, Ordering::SeqCst)
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!(from = ?*state, to = ?next, "Session lifecycle transition");
            *state = next;
        }
    }

    /// Where an interrupted attempt lands: still authenticated if an older
    /// credential survives, anonymous otherwise.
    fn settle(&self) {
        let next = if self.store.get().is_authenticated() {
            LifecycleState::Authenticated
        } else {
            LifecycleState::Anonymous
        };
        self.transition(next);
    }

    async fn authenticate<F>(&self, op: AuthOperation, call: F) -> Result<Credential, SessionError>
    where
        F: Future<Output = Result<Credential, SessionError>>,
    {
        self.expired_notice.store(false, Ordering::SeqCst);
        self.transition(LifecycleState::Authenticating);

        match call.await {
            Ok(credential) => {
                self.store.set(credential.clone());
                self.transition(LifecycleState::Authenticated);
                info!(?op, subject = %credential.subject_id(), "Authenticated");
                Ok(credential)
            }
            Err(e) => {
                warn!(?op, error = %e, "Authentication failed");
                self.settle();
                Err(e)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, SessionError> {
        let request = LoginRequest::new(email.trim(), password);
        validate_login(&request)?;

        self.authenticate(AuthOperation::Login, async {
            self.backend
                .login(&request)
                .await
                .map_err(|e| SessionError::from_api(AuthOperation::Login, e))
        })
        .await
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<Credential, SessionError> {
        let request = RegisterRequest {
            email: request.email.trim().to_string(),
            ..request
        };
        validate_registration(&request)?;

        self.authenticate(AuthOperation::Register, async {
            self.backend
                .register(&request)
                .await
                .map_err(|e| SessionError::from_api(AuthOperation::Register, e))
        })
        .await
    }

    /// Start the provider sign-in. The flow continues in the user's browser
    /// and comes back through [`Self::complete_external_login`].
    pub fn begin_external_login(&self) -> Result<ExternalLoginRequest, SessionError> {
        self.oauth.begin_external_login()
    }

    pub async fn complete_external_login(&self, provider_token: &str) -> Result<Credential, SessionError> {
        self.authenticate(
            AuthOperation::ProviderExchange,
            self.oauth.complete_external_login(provider_token),
        )
        .await
    }

    /// Provider callback entry point: checks the echoed `state` first.
    pub async fn complete_external_callback(
        &self,
        state: &str,
        provider_token: &str,
    ) -> Result<Credential, SessionError> {
        if !self.oauth.verify_state(state) {
            return Err(SessionError::ProviderAuthFailed(
                "sign-in response did not match this login attempt".to_string(),
            ));
        }
        self.complete_external_login(provider_token).await
    }

    /// End the session. Local state is cleared before the backend is told,
    /// so the user is logged out even if that call fails or hangs.
    pub async fn logout(&self) {
        let access_token = self.store.credential().map(|c| c.access_token().to_string());
        let refresh_token = self.store.refresh_token();

        self.store.clear();
        self.expired_notice.store(false, Ordering::SeqCst);
        self.transition(LifecycleState::Anonymous);
        info!("Logged out");

        if access_token.is_none() && refresh_token.is_none() {
            return;
        }

        let remote = self
            .backend
            .logout(access_token.as_deref(), refresh_token.as_deref());
        match tokio::time::timeout(self.config.refresh_timeout(), remote).await {
            Ok(Ok(())) => debug!("Remote logout acknowledged"),
            Ok(Err(e)) => warn!(error = %e, "Remote logout failed"),
            Err(_) => warn!("Remote logout timed out"),
        }
    }

    /// Startup: resume a previous session from the vaulted refresh token.
    /// A token that no longer works is discarded without raising the
    /// session-expired notice.
    pub async fn restore(&self) -> SessionState {
        if self.store.get().is_authenticated() {
            self.transition(LifecycleState::Authenticated);
            return self.store.get();
        }
        if self.store.refresh_token().is_none() {
            debug!("No saved session to restore");
            self.transition(LifecycleState::Anonymous);
            return SessionState::Anonymous;
        }

        self.transition(LifecycleState::Authenticating);
        match self.coordinator.refresh().await {
            Ok(credential) => info!(subject = %credential.subject_id(), "Session restored"),
            Err(e) => info!(error = %e, "Saved session could not be restored"),
        }
        self.settle();
        self.store.get()
    }
}

// ============================================================================
// Process-wide instance
// ============================================================================

static GLOBAL: RwLock<Option<Arc<SessionController>>> = RwLock::new(None);

/// Install the process-wide controller. Fails if one is already installed.
pub fn init(controller: Arc<SessionController>) -> Result<Arc<SessionController>> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        anyhow::bail!("Session controller already initialized");
    }
    *slot = Some(Arc::clone(&controller));
    debug!("Session controller initialized");
    Ok(controller)
}

/// The installed controller, if any.
pub fn global() -> Option<Arc<SessionController>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove the process-wide controller, returning it. Safe to call twice.
pub fn teardown() -> Option<Arc<SessionController>> {
    let previous = GLOBAL.write().unwrap_or_else(PoisonError::into_inner).take();
    if previous.is_some() {
        debug!("Session controller torn down");
    }
    previous
}

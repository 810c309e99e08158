//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use crate::api::backend::{AuthBackend, LoginRequest, RegisterRequest};
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::api::ApiError;
use crate::auth::credential::Credential;
use crate::auth::store::CredentialStore;
use crate::auth::vault::MemoryVault;

pub const VALID_EMAIL: &str = "a@x.com";
pub const VALID_PASSWORD: &str = "Valid1!@";
pub const TAKEN_EMAIL: &str = "taken@x.com";
pub const GOOD_PROVIDER_TOKEN: &str = "google-id-token";

pub fn store_with(credential: Option<Credential>) -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::new(
        Arc::new(MemoryVault::new()),
        chrono::Duration::seconds(30),
    ));
    if let Some(credential) = credential {
        store.set(credential);
    }
    store
}

pub fn valid_credential(token: &str) -> Credential {
    Credential::new(
        token,
        Utc::now() + chrono::Duration::minutes(15),
        Some(format!("rt-{}", token)),
        "u-1",
    )
}

pub fn expired_credential() -> Credential {
    Credential::new(
        "at-expired",
        Utc::now() - chrono::Duration::minutes(1),
        Some("rt-expired".to_string()),
        "u-1",
    )
}

#[derive(Clone)]
pub enum RefreshOutcome {
    Succeed,
    Fail(ApiError),
    Hang,
}

pub struct FakeBackend {
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    issued: AtomicUsize,
    refresh_delay: Duration,
    refresh_outcome: Mutex<RefreshOutcome>,
    rotate: bool,
    token_lifetime: chrono::Duration,
    login_refresh_token: bool,
    logout_fails: AtomicBool,
    logout_hangs: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            refresh_delay: Duration::ZERO,
            refresh_outcome: Mutex::new(RefreshOutcome::Succeed),
            rotate: true,
            token_lifetime: chrono::Duration::minutes(15),
            login_refresh_token: true,
            logout_fails: AtomicBool::new(false),
            logout_hangs: AtomicBool::new(false),
        }
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn with_refresh_outcome(self, outcome: RefreshOutcome) -> Self {
        *self.refresh_outcome.lock().unwrap() = outcome;
        self
    }

    pub fn without_rotation(mut self) -> Self {
        self.rotate = false;
        self
    }

    /// Lifetime of every token issued from now on.
    pub fn with_token_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub fn without_login_refresh_token(mut self) -> Self {
        self.login_refresh_token = false;
        self
    }

    pub fn set_refresh_outcome(&self, outcome: RefreshOutcome) {
        *self.refresh_outcome.lock().unwrap() = outcome;
    }

    pub fn fail_logout(&self) {
        self.logout_fails.store(true, Ordering::SeqCst);
    }

    pub fn hang_logout(&self) {
        self.logout_hangs.store(true, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    fn issue(&self, prefix: &str, rotate: bool) -> Credential {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Credential::new(
            format!("at-{}-{}", prefix, n),
            Utc::now() + self.token_lifetime,
            rotate.then(|| format!("rt-{}-{}", prefix, n)),
            "u-1",
        )
    }
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn login(&self, request: &LoginRequest) -> Result<Credential, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if request.email == VALID_EMAIL && request.password == VALID_PASSWORD {
            Ok(self.issue("login", self.login_refresh_token))
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Credential, ApiError> {
        if request.email == TAKEN_EMAIL {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }
        Ok(self.issue("register", true))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credential, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let outcome = self.refresh_outcome.lock().unwrap().clone();
        match outcome {
            RefreshOutcome::Succeed => Ok(self.issue("refreshed", self.rotate)),
            RefreshOutcome::Fail(e) => Err(e),
            RefreshOutcome::Hang => std::future::pending().await,
        }
    }

    async fn logout(
        &self,
        _access_token: Option<&str>,
        _refresh_token: Option<&str>,
    ) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.logout_hangs.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.logout_fails.load(Ordering::SeqCst) {
            return Err(ApiError::NetworkError("connection reset".to_string()));
        }
        Ok(())
    }

    async fn exchange_provider_token(&self, provider_token: &str) -> Result<Credential, ApiError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if provider_token == GOOD_PROVIDER_TOKEN {
            Ok(self.issue("oauth", true))
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

type Acceptor = Box<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// Transport that answers 200 for bearer tokens the acceptor likes and 401
/// otherwise, echoing the token it saw.
pub struct FakeTransport {
    accept: Acceptor,
    seen: Mutex<Vec<Option<String>>>,
    fail_network: AtomicBool,
}

impl FakeTransport {
    pub fn accepting<F>(accept: F) -> Self
    where
        F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
    {
        Self {
            accept: Box::new(accept),
            seen: Mutex::new(Vec::new()),
            fail_network: AtomicBool::new(false),
        }
    }

    /// Accepts only tokens minted by a refresh.
    pub fn refreshed_only() -> Self {
        Self::accepting(|token| token.is_some_and(|t| t.starts_with("at-refreshed")))
    }

    pub fn fail_network(&self) {
        self.fail_network.store(true, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        if self.fail_network.load(Ordering::SeqCst) {
            return Err(ApiError::NetworkError("connection refused".to_string()));
        }
        let token = request.bearer_token().map(str::to_string);
        self.seen.lock().unwrap().push(token.clone());
        tokio::task::yield_now().await;

        if (self.accept)(token.as_deref()) {
            let body = serde_json::json!({ "token": token }).to_string();
            Ok(ApiResponse::new(StatusCode::OK, body))
        } else {
            Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, r#"{"message":"jwt expired"}"#))
        }
    }
}

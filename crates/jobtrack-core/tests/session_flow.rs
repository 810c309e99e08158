//! End-to-end session scenarios against an in-process fake backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use jobtrack_core::api::{
    ApiError, ApiRequest, ApiResponse, AuthBackend, LoginRequest, RegisterRequest, Transport,
};
use jobtrack_core::auth::{GuardDecision, LifecycleState, MemoryVault, SessionController};
use jobtrack_core::{Config, Credential, SessionError, SessionState};

/// Backend whose login tokens live `login_ttl` seconds and whose refresh
/// tokens are counted.
struct Backend {
    login_ttl: i64,
    refresh_calls: AtomicUsize,
    refresh_ok: bool,
    logout_ok: bool,
}

impl Backend {
    fn new(login_ttl: i64) -> Self {
        Self {
            login_ttl,
            refresh_calls: AtomicUsize::new(0),
            refresh_ok: true,
            logout_ok: true,
        }
    }

    fn credential(token: String, ttl: i64) -> Credential {
        Credential::new(
            token,
            Utc::now() + chrono::Duration::seconds(ttl),
            Some("rt-1".to_string()),
            "user-1",
        )
    }
}

#[async_trait]
impl AuthBackend for Backend {
    async fn login(&self, request: &LoginRequest) -> Result<Credential, ApiError> {
        if request.email == "a@x.com" && request.password == "Valid1!@" {
            Ok(Self::credential("at-login".to_string(), self.login_ttl))
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<Credential, ApiError> {
        Err(ApiError::Conflict("Email already registered".to_string()))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<Credential, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(25)).await;
        if self.refresh_ok {
            Ok(Self::credential(format!("at-fresh-{}", n), 900))
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    async fn logout(&self, _access: Option<&str>, _refresh: Option<&str>) -> Result<(), ApiError> {
        if self.logout_ok {
            Ok(())
        } else {
            Err(ApiError::ServerError("logout unavailable".to_string()))
        }
    }

    async fn exchange_provider_token(&self, _token: &str) -> Result<Credential, ApiError> {
        Err(ApiError::Unauthorized)
    }
}

/// API that only honours refreshed tokens and records the tokens it saw.
#[derive(Default)]
struct Api {
    seen: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl Transport for Api {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let token = request.bearer_token().map(str::to_string);
        self.seen.lock().unwrap().push(token.clone());
        match token {
            Some(t) if t.starts_with("at-fresh") => Ok(ApiResponse::new(StatusCode::OK, "[]")),
            _ => Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, "")),
        }
    }
}

fn controller(backend: Backend) -> (Arc<SessionController>, Arc<Backend>, Arc<Api>) {
    let backend = Arc::new(backend);
    let api = Arc::new(Api::default());
    let controller = SessionController::new(
        Config::default(),
        backend.clone(),
        api.clone(),
        Arc::new(MemoryVault::new()),
    );
    (controller, backend, api)
}

#[tokio::test]
async fn login_stores_credential_and_notifies_subscriber_once() {
    let (controller, _, _) = controller(Backend::new(900));
    let notifications = Arc::new(Mutex::new(Vec::new()));
    let n = notifications.clone();
    controller.store().subscribe(move |state| {
        n.lock().unwrap().push(state.is_authenticated());
    });

    controller.login("a@x.com", "Valid1!@").await.unwrap();

    assert!(controller.session().is_authenticated());
    assert_eq!(controller.state(), LifecycleState::Authenticated);
    assert_eq!(*notifications.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn concurrent_requests_with_expired_token_refresh_once() {
    // A 10s token is inside the 30s leeway, so it is already expired.
    let (controller, backend, api) = controller(Backend::new(10));
    controller.login("a@x.com", "Valid1!@").await.unwrap();
    assert_eq!(controller.session(), SessionState::Anonymous);

    let authorizer = controller.authorizer();
    let (r1, r2) = tokio::join!(
        authorizer.send(ApiRequest::get("http://api/applications")),
        authorizer.send(ApiRequest::get("http://api/applications/1")),
    );

    assert_eq!(r1.unwrap().status, StatusCode::OK);
    assert_eq!(r2.unwrap().status, StatusCode::OK);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *api.seen.lock().unwrap(),
        vec![Some("at-fresh-1".to_string()), Some("at-fresh-1".to_string())]
    );
}

#[tokio::test]
async fn unauthorized_request_is_retried_with_refreshed_token() {
    let (controller, backend, api) = controller(Backend::new(900));
    controller.login("a@x.com", "Valid1!@").await.unwrap();

    let response = controller
        .authorizer()
        .send(ApiRequest::get("http://api/applications"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *api.seen.lock().unwrap(),
        vec![Some("at-login".to_string()), Some("at-fresh-1".to_string())]
    );
}

#[tokio::test]
async fn failed_refresh_forces_logout_with_notice() {
    let mut backend = Backend::new(900);
    backend.refresh_ok = false;
    let (controller, _, _) = controller(backend);
    controller.login("a@x.com", "Valid1!@").await.unwrap();

    let err = controller
        .authorizer()
        .send(ApiRequest::get("http://api/applications"))
        .await
        .unwrap_err();

    assert_eq!(err, SessionError::SessionExpired);
    assert!(controller.store().credential().is_none());
    assert!(controller.take_session_expired_notice());
    assert_eq!(controller.state(), LifecycleState::Anonymous);
}

#[tokio::test]
async fn logout_succeeds_locally_when_backend_fails() {
    let mut backend = Backend::new(900);
    backend.logout_ok = false;
    let (controller, _, _) = controller(backend);
    controller.login("a@x.com", "Valid1!@").await.unwrap();

    controller.logout().await;

    assert_eq!(controller.session(), SessionState::Anonymous);
}

#[tokio::test]
async fn logout_while_refresh_in_flight_stays_logged_out() {
    let (controller, backend, _) = controller(Backend::new(900));
    controller.login("a@x.com", "Valid1!@").await.unwrap();

    let request = {
        let authorizer = Arc::clone(controller.authorizer());
        tokio::spawn(async move { authorizer.send(ApiRequest::get("http://api/applications")).await })
    };
    while backend.refresh_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    controller.logout().await;
    let result = request.await.unwrap();

    assert_eq!(result.unwrap_err(), SessionError::SessionExpired);
    assert_eq!(controller.session(), SessionState::Anonymous);
    assert_eq!(controller.state(), LifecycleState::Anonymous);
    assert!(controller.store().refresh_token().is_none());
}

#[tokio::test]
async fn guards_follow_the_session() {
    let (controller, _, _) = controller(Backend::new(900));
    let guard = controller.guard();

    let decision = guard.require_auth("/applications/42");
    assert_eq!(
        decision,
        GuardDecision::Redirect {
            to: "/login".to_string(),
            return_url: Some("/applications/42".to_string()),
        }
    );
    assert!(guard.require_guest().is_allowed());

    controller.login("a@x.com", "Valid1!@").await.unwrap();

    assert!(guard.require_auth("/applications/42").is_allowed());
    assert!(!guard.require_guest().is_allowed());
    assert_eq!(guard.resume_target(Some("/applications/42")), "/applications/42");
}

#[tokio::test]
async fn registration_conflict_is_reported_without_state_change() {
    let (controller, _, _) = controller(Backend::new(900));

    let err = controller
        .register(RegisterRequest::new("Ada", "a@x.com", "Valid1!@"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SessionError::InvalidCredentials("Email already registered".to_string())
    );
    assert_eq!(controller.state(), LifecycleState::Anonymous);
}

//! Outbound request authorization with refresh-then-retry.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::auth::credential::SessionState;
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::store::CredentialStore;
use crate::error::{AuthOperation, SessionError};

/// Attaches the current access token to outbound calls and recovers from a
/// single authorization failure by refreshing and replaying once.
///
/// Reads the credential store but never mutates it; refreshes go through
/// the [`RefreshCoordinator`].
pub struct RequestAuthorizer {
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    transport: Arc<dyn Transport>,
}

impl RequestAuthorizer {
    pub fn new(
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            coordinator,
            transport,
        }
    }

    /// Attach the bearer token when authenticated; anonymous requests pass
    /// through untouched.
    pub fn authorize(&self, mut request: ApiRequest) -> ApiRequest {
        if let SessionState::Authenticated(credential) = self.store.get() {
            if let Err(e) = request.set_bearer(credential.access_token()) {
                warn!(error = %e, "Could not attach access token");
                request.clear_bearer();
            }
        }
        request
    }

    /// Send a request through the full pipeline.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        self.wait_for_fresh_credential().await?;

        let request = self.authorize(request);
        let response = self.dispatch(&request).await?;
        self.on_response(request, response).await
    }

    /// Send a request and decode its JSON body. Non-success statuses and
    /// undecodable bodies come back as [`SessionError`]s like everything else.
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, SessionError> {
        let url = request.url.clone();
        let response = self.send(request).await?;
        response
            .error_for_status()
            .and_then(|response| response.json())
            .map_err(|e| {
                debug!(url = %url, error = %e, "API call failed");
                SessionError::from_api(AuthOperation::Request, e)
            })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SessionError> {
        self.request_json(ApiRequest::get(url)).await
    }

    pub async fn post_json<T, B>(&self, url: &str, body: &B) -> Result<T, SessionError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.send_json(Method::POST, url, body).await
    }

    /// JSON body with any method (PATCH, PUT, ...).
    pub async fn send_json<T, B>(&self, method: Method, url: &str, body: &B) -> Result<T, SessionError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| SessionError::NetworkFailure(format!("Failed to encode request body: {}", e)))?;
        self.request_json(ApiRequest::new(method, url).with_body(body)).await
    }

    /// Handle a response to `request`, replaying it once after a refresh if
    /// the backend rejected its token.
    pub async fn on_response(
        &self,
        request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, SessionError> {
        if !response.is_unauthorized() {
            return Ok(response);
        }
        if request.is_retry() {
            warn!(url = %request.url, "Replayed request still unauthorized");
            return Err(SessionError::SessionExpired);
        }

        let sent_with = request.bearer_token().map(str::to_string);
        let current = self.store.get();
        let rotated = match current.access_token() {
            Some(token) => sent_with.as_deref() != Some(token),
            None => false,
        };

        if rotated {
            debug!(url = %request.url, "Token rotated while request was in flight, replaying");
        } else {
            if sent_with.is_none() && self.store.refresh_token().is_none() {
                // Anonymous call with nothing to refresh; the caller decides.
                return Ok(response);
            }
            debug!(url = %request.url, "Unauthorized, refreshing before replay");
            self.coordinator.refresh().await?;
        }

        let retry = self.authorize(request.into_retry());
        let response = self.dispatch(&retry).await?;
        if response.is_unauthorized() {
            warn!(url = %retry.url, "Replayed request still unauthorized");
            return Err(SessionError::SessionExpired);
        }
        Ok(response)
    }

    /// Hold the request back while a refresh is pending, or start one when
    /// the stored token is already past its expiry.
    async fn wait_for_fresh_credential(&self) -> Result<(), SessionError> {
        if let Some(pending) = self.coordinator.in_flight() {
            debug!("Waiting for in-flight refresh");
            pending.await?;
            return Ok(());
        }

        if let Some(credential) = self.store.credential() {
            if credential.is_expired(self.store.leeway()) && credential.can_refresh() {
                debug!("Access token expired, refreshing before send");
                self.coordinator.refresh().await?;
            }
        }
        Ok(())
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        self.transport
            .send(request)
            .await
            .map_err(|e| SessionError::from_api(AuthOperation::Request, e))
    }
}

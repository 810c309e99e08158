//! API client for job application data.
//!
//! Every call goes through the [`RequestAuthorizer`], so callers never see
//! a stale token or handle refresh themselves. Failures arrive as
//! [`SessionError`]s; raw HTTP errors stay inside the api layer.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;

use super::authorizer::RequestAuthorizer;
use crate::config::Config;
use crate::error::SessionError;
use crate::models::{AiAnalysis, ApplicationStatus, JobApplication, NewApplication};

/// Clone is cheap - the authorizer is shared behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    authorizer: Arc<RequestAuthorizer>,
    base_url: String,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: ApplicationStatus,
}

impl ApiClient {
    pub fn new(authorizer: Arc<RequestAuthorizer>, config: &Config) -> Self {
        Self {
            authorizer,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ===== Data Fetching Methods =====

    /// Fetch all applications for the logged-in user
    pub async fn fetch_applications(&self) -> Result<Vec<JobApplication>, SessionError> {
        self.authorizer.get_json(&self.url("/applications")).await
    }

    pub async fn fetch_application(&self, id: &str) -> Result<JobApplication, SessionError> {
        self.authorizer
            .get_json(&self.url(&format!("/applications/{}", id)))
            .await
    }

    pub async fn create_application(&self, application: &NewApplication) -> Result<JobApplication, SessionError> {
        self.authorizer
            .post_json(&self.url("/applications"), application)
            .await
    }

    pub async fn update_status(&self, id: &str, status: ApplicationStatus) -> Result<JobApplication, SessionError> {
        self.authorizer
            .send_json(
                Method::PATCH,
                &self.url(&format!("/applications/{}", id)),
                &StatusUpdate { status },
            )
            .await
    }

    /// Ask the backend to run AI analysis on an application
    pub async fn analyze_application(&self, id: &str) -> Result<AiAnalysis, SessionError> {
        self.authorizer
            .post_json(
                &self.url(&format!("/applications/{}/analyze", id)),
                &serde_json::json!({}),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::api::transport::{ApiRequest, ApiResponse, Transport};
    use crate::api::ApiError;
    use crate::auth::refresh::RefreshCoordinator;
    use crate::test_support::{store_with, valid_credential, FakeBackend};

    /// Replies with a fixed status/body and records what it was asked.
    struct CannedTransport {
        status: StatusCode,
        body: String,
        requests: Mutex<Vec<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ApiResponse::new(self.status, self.body.clone()))
        }
    }

    fn client(status: StatusCode, body: &str) -> (ApiClient, Arc<CannedTransport>) {
        let store = store_with(Some(valid_credential("at-live")));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            Arc::new(FakeBackend::new()),
            Duration::from_secs(10),
        ));
        let transport = Arc::new(CannedTransport {
            status,
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let authorizer = Arc::new(RequestAuthorizer::new(store, coordinator, transport.clone()));
        let mut config = Config::default();
        config.api_base_url = "https://api.example.com/api/".to_string();
        (ApiClient::new(authorizer, &config), transport)
    }

    #[tokio::test]
    async fn test_fetch_applications_sends_bearer() {
        let (client, transport) = client(
            StatusCode::OK,
            r#"[{"id": "1", "company": "Acme", "position": "SRE"}]"#,
        );

        let apps = client.fetch_applications().await.unwrap();

        assert_eq!(apps.len(), 1);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].url, "https://api.example.com/api/applications");
        assert_eq!(requests[0].bearer_token(), Some("at-live"));
    }

    #[tokio::test]
    async fn test_update_status_body() {
        let (client, transport) = client(
            StatusCode::OK,
            r#"{"id": "7", "company": "Acme", "position": "SRE", "status": "offer"}"#,
        );

        let app = client.update_status("7", ApplicationStatus::Offer).await.unwrap();

        assert_eq!(app.status, ApplicationStatus::Offer);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].method, Method::PATCH);
        assert_eq!(requests[0].body, Some(serde_json::json!({"status": "offer"})));
    }

    #[tokio::test]
    async fn test_not_found_is_session_error() {
        let (client, _) = client(StatusCode::NOT_FOUND, r#"{"message": "No such application"}"#);

        let err = client.fetch_application("missing").await.unwrap_err();

        match err {
            SessionError::NetworkFailure(message) => assert!(message.contains("No such application")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_network_failure() {
        let (client, _) = client(StatusCode::BAD_GATEWAY, r#"{"message": "upstream down"}"#);

        let err = client.fetch_applications().await.unwrap_err();

        assert!(matches!(err, SessionError::NetworkFailure(_)));
    }

    #[tokio::test]
    async fn test_expired_session_surfaces_as_session_error() {
        let (client, _) = client(StatusCode::UNAUTHORIZED, "");

        let err = client.fetch_applications().await.unwrap_err();

        // FakeBackend refreshes fine, but the canned API keeps refusing.
        assert_eq!(err, SessionError::SessionExpired);
    }
}

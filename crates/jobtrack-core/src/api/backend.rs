//! Client for the backend authentication endpoints.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::ApiError;
use crate::auth::credential::{Credential, TokenPayload};
use crate::config::Config;

#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl RegisterRequest {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// The backend's authentication endpoints.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<Credential, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<Credential, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError>;

    /// Revoke the session server-side.
    async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), ApiError>;

    /// Trade an identity provider token for a session credential.
    async fn exchange_provider_token(&self, provider_token: &str) -> Result<Credential, ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Serialize)]
struct ProviderBody<'a> {
    token: &'a str,
}

/// HTTP implementation of [`AuthBackend`].
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
}

impl HttpAuthBackend {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(client, &config.api_base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post_for_credential<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Credential, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "Posting auth request");

        let response = self.client.post(&url).json(body).send().await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        let payload: TokenPayload = serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("token payload from {}: {}", path, e)))?;
        Credential::from_payload(payload, Utc::now())
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<Credential, ApiError> {
        self.post_for_credential("/auth/login", request).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Credential, ApiError> {
        self.post_for_credential("/auth/register", request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, ApiError> {
        self.post_for_credential("/auth/refresh", &RefreshBody { refresh_token })
            .await
    }

    async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut builder = self
            .client
            .post(self.url("/auth/logout"))
            .json(&LogoutBody { refresh_token });
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn exchange_provider_token(&self, provider_token: &str) -> Result<Credential, ApiError> {
        self.post_for_credential("/auth/google", &ProviderBody {
            token: provider_token,
        })
        .await
    }
}

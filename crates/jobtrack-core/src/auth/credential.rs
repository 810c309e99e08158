use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::api::ApiError;

/// Tokens issued to a logged-in user.
///
/// Built whole and replaced whole: there is no way to change the access
/// token without also changing its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_at: DateTime<Utc>,
    refresh_token: Option<String>,
    subject_id: String,
}

/// Token payload returned by login, register, refresh and provider exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: UserPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
            refresh_token,
            subject_id: subject_id.into(),
        }
    }

    /// Build a credential from a backend payload received at `received_at`.
    pub fn from_payload(payload: TokenPayload, received_at: DateTime<Utc>) -> Result<Self, ApiError> {
        if payload.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("empty access token".to_string()));
        }
        if payload.user.id.trim().is_empty() {
            return Err(ApiError::InvalidResponse("missing user id".to_string()));
        }
        if payload.expires_in <= 0 {
            return Err(ApiError::InvalidResponse(format!(
                "non-positive token lifetime: {}",
                payload.expires_in
            )));
        }

        Ok(Self {
            access_token: payload.access_token,
            expires_at: received_at + Duration::seconds(payload.expires_in),
            refresh_token: payload.refresh_token.filter(|t| !t.is_empty()),
            subject_id: payload.user.id,
        })
    }

    /// Keep `previous` as the refresh token when the backend did not rotate it.
    pub fn or_refresh_token(mut self, previous: Option<String>) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous;
        }
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Whether the token is unusable at `now`, treating the last `leeway`
    /// before expiry as already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expires_at <= now + leeway
    }

    pub fn is_expired(&self, leeway: Duration) -> bool {
        self.is_expired_at(Utc::now(), leeway)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("refresh_token_set", &self.refresh_token.is_some())
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

/// Authentication status derived from the stored credential and the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated(Credential),
    Anonymous,
}

impl SessionState {
    pub fn derive(credential: Option<&Credential>, now: DateTime<Utc>, leeway: Duration) -> Self {
        match credential {
            Some(c) if !c.is_expired_at(now, leeway) => SessionState::Authenticated(c.clone()),
            _ => SessionState::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            SessionState::Authenticated(c) => Some(c),
            SessionState::Anonymous => None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credential().map(|c| c.access_token())
    }
}

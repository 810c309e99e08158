//! Third-party sign-in handshake.
//!
//! `begin_external_login` produces the provider URL the user's browser must
//! visit; the flow resumes later when the provider hands back an identity
//! token, which `complete_external_login` trades for a session credential.

use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use reqwest::Url;
use tracing::{debug, info, warn};

use super::credential::Credential;
use crate::api::AuthBackend;
use crate::config::Config;
use crate::error::{AuthOperation, SessionError};

const OAUTH_SCOPE: &str = "openid email profile";

/// Where to send the user to start external sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLoginRequest {
    pub authorize_url: String,
    pub state: String,
}

pub struct OAuthBridge {
    backend: Arc<dyn AuthBackend>,
    client_id: Option<String>,
    authorize_url: String,
    redirect_uri: String,
    pending_state: Mutex<Option<String>>,
}

fn generate_state() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl OAuthBridge {
    pub fn new(backend: Arc<dyn AuthBackend>, config: &Config) -> Self {
        Self {
            backend,
            client_id: config.oauth_client_id.clone(),
            authorize_url: config.oauth_authorize_url.clone(),
            redirect_uri: config.oauth_redirect_uri.clone(),
            pending_state: Mutex::new(None),
        }
    }

    /// Build the provider authorization URL and remember its state nonce.
    pub fn begin_external_login(&self) -> Result<ExternalLoginRequest, SessionError> {
        let client_id = self.client_id.as_deref().ok_or_else(|| {
            SessionError::ProviderAuthFailed("OAuth client id is not configured".to_string())
        })?;

        let mut url = Url::parse(&self.authorize_url).map_err(|e| {
            SessionError::ProviderAuthFailed(format!("invalid authorize URL: {}", e))
        })?;
        let state = generate_state();
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "id_token")
            .append_pair("scope", OAUTH_SCOPE)
            .append_pair("state", &state)
            .append_pair("nonce", &state);

        *self.pending_state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        debug!("External login started");

        Ok(ExternalLoginRequest {
            authorize_url: url.into(),
            state,
        })
    }

    /// Check the `state` echoed by the provider. Each nonce is accepted once.
    pub fn verify_state(&self, state: &str) -> bool {
        let mut pending = self.pending_state.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_deref() {
            Some(expected) if expected == state => {
                *pending = None;
                true
            }
            _ => {
                warn!("OAuth state mismatch");
                false
            }
        }
    }

    /// Exchange the provider's token for a session credential.
    ///
    /// Never touches the credential store; the session controller stores
    /// the result.
    pub async fn complete_external_login(&self, provider_token: &str) -> Result<Credential, SessionError> {
        let provider_token = provider_token.trim();
        if provider_token.is_empty() {
            return Err(SessionError::ProviderAuthFailed(
                "provider returned no token".to_string(),
            ));
        }

        match self.backend.exchange_provider_token(provider_token).await {
            Ok(credential) => {
                info!(subject = %credential.subject_id(), "External login completed");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Provider token exchange failed");
                Err(SessionError::from_api(AuthOperation::ProviderExchange, e))
            }
        }
    }
}

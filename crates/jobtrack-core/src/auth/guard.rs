//! Navigation-time route guards.
//!
//! Guards only decide; the navigation layer acts on the returned
//! [`GuardDecision`].

use std::sync::Arc;

use reqwest::Url;
use serde::Serialize;

use super::credential::SessionState;
use super::store::CredentialStore;

pub const DEFAULT_LOGIN_URL: &str = "/login";
pub const DEFAULT_HOME_URL: &str = "/dashboard";

/// Query parameter carrying the originally requested route.
pub const RETURN_URL_PARAM: &str = "returnUrl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum GuardDecision {
    Allow,
    Redirect {
        to: String,
        #[serde(rename = "returnUrl", skip_serializing_if = "Option::is_none")]
        return_url: Option<String>,
    },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }

    /// Redirect target as a path with the return URL in the query string.
    pub fn location(&self) -> Option<String> {
        match self {
            GuardDecision::Allow => None,
            GuardDecision::Redirect {
                to,
                return_url: None,
            } => Some(to.clone()),
            GuardDecision::Redirect {
                to,
                return_url: Some(target),
            } => Some(
                Url::parse("http://localhost")
                    .and_then(|base| base.join(to))
                    .map(|mut url| {
                        url.query_pairs_mut().append_pair(RETURN_URL_PARAM, target);
                        format!("{}?{}", url.path(), url.query().unwrap_or_default())
                    })
                    .unwrap_or_else(|_| to.clone()),
            ),
        }
    }
}

/// Allow iff authenticated; otherwise send the user to login, remembering
/// where they were going.
pub fn require_auth(state: &SessionState, target_url: &str, login_url: &str) -> GuardDecision {
    if state.is_authenticated() {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect {
            to: login_url.to_string(),
            return_url: Some(target_url.to_string()),
        }
    }
}

/// Allow iff anonymous; keeps logged-in users out of login/register.
pub fn require_guest(state: &SessionState, home_url: &str) -> GuardDecision {
    if state.is_authenticated() {
        GuardDecision::Redirect {
            to: home_url.to_string(),
            return_url: None,
        }
    } else {
        GuardDecision::Allow
    }
}

/// Only same-origin absolute paths are safe to navigate to after login.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

/// Guards bound to the live credential store. Every evaluation reads the
/// store at that moment.
pub struct RouteGuard {
    store: Arc<CredentialStore>,
    login_url: String,
    home_url: String,
}

impl RouteGuard {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self::with_urls(store, DEFAULT_LOGIN_URL, DEFAULT_HOME_URL)
    }

    pub fn with_urls(
        store: Arc<CredentialStore>,
        login_url: impl Into<String>,
        home_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            login_url: login_url.into(),
            home_url: home_url.into(),
        }
    }

    pub fn require_auth(&self, target_url: &str) -> GuardDecision {
        require_auth(&self.store.get(), target_url, &self.login_url)
    }

    pub fn require_guest(&self) -> GuardDecision {
        require_guest(&self.store.get(), &self.home_url)
    }

    /// Where to go after a successful login.
    pub fn resume_target(&self, return_url: Option<&str>) -> String {
        match return_url {
            Some(path) if is_local_path(path) && path != self.login_url => path.to_string(),
            _ => self.home_url.clone(),
        }
    }
}

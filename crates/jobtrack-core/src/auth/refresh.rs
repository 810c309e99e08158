//! Single-flight token refresh.
//!
//! At most one refresh exchange runs at a time. Every caller that asks for a
//! refresh while one is pending gets a clone of the same shared handle, so
//! the refresh endpoint is hit once no matter how many requests noticed the
//! expired token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::store::CredentialStore;
use crate::api::{ApiError, AuthBackend};
use crate::error::{AuthOperation, SessionError};

/// Awaitable, cloneable handle to the in-flight refresh.
pub type RefreshHandle = Shared<BoxFuture<'static, Result<Credential, SessionError>>>;

type ExpiredHook = Arc<dyn Fn() + Send + Sync>;

struct Pending {
    generation: u64,
    handle: RefreshHandle,
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    timeout: Duration,
    pending: Arc<Mutex<Option<Pending>>>,
    generation: AtomicU64,
    on_expired: Arc<Mutex<Option<ExpiredHook>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, backend: Arc<dyn AuthBackend>, timeout: Duration) -> Self {
        Self {
            store,
            backend,
            timeout,
            pending: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            on_expired: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the callback run after a refresh fails terminally.
    pub fn on_session_expired<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.on_expired) = Some(Arc::new(hook));
    }

    /// The pending refresh, if one is running.
    pub fn in_flight(&self) -> Option<RefreshHandle> {
        lock(&self.pending).as_ref().map(|p| p.handle.clone())
    }

    /// Start a refresh, or join the one already running.
    ///
    /// The handle is installed before this returns, so two calls in the same
    /// tick always share one exchange. The exchange runs as its own task and
    /// settles even if every caller stops waiting. Must be called from
    /// within a tokio runtime.
    pub fn refresh(&self) -> RefreshHandle {
        let mut pending = lock(&self.pending);
        if let Some(ref p) = *pending {
            debug!(generation = p.generation, "Joining in-flight refresh");
            return p.handle.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        // Read together so a later login or logout is detected on return.
        let epoch = self.store.epoch();
        let refresh_token = self.store.refresh_token();
        debug!(generation, epoch, "Starting token refresh");

        let task = tokio::spawn(run_refresh(
            RefreshRun {
                store: Arc::clone(&self.store),
                backend: Arc::clone(&self.backend),
                timeout: self.timeout,
                generation,
                epoch,
                refresh_token,
            },
            Arc::clone(&self.pending),
            Arc::clone(&self.on_expired),
        ));

        let handle = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(generation, error = %e, "Refresh task did not complete");
                    Err(SessionError::SessionExpired)
                }
            }
        }
        .boxed()
        .shared();

        *pending = Some(Pending {
            generation,
            handle: handle.clone(),
        });
        handle
    }
}

struct RefreshRun {
    store: Arc<CredentialStore>,
    backend: Arc<dyn AuthBackend>,
    timeout: Duration,
    generation: u64,
    epoch: u64,
    refresh_token: Option<String>,
}

async fn run_refresh(
    run: RefreshRun,
    pending: Arc<Mutex<Option<Pending>>>,
    on_expired: Arc<Mutex<Option<ExpiredHook>>>,
) -> Result<Credential, SessionError> {
    let RefreshRun {
        store,
        backend,
        timeout,
        generation,
        epoch,
        refresh_token,
    } = run;

    let outcome = match refresh_token {
        None => Err(ApiError::Unauthorized),
        Some(token) => match tokio::time::timeout(timeout, backend.refresh(&token)).await {
            Ok(Ok(credential)) => Ok(credential.or_refresh_token(Some(token))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ApiError::Timeout),
        },
    };

    // A login or logout that landed meanwhile wins; this result is dropped.
    let mut session_lost = false;
    let result = match outcome {
        Ok(credential) => {
            if store.set_if_epoch(credential.clone(), epoch) {
                info!(generation, subject = %credential.subject_id(), "Token refreshed");
                Ok(credential)
            } else {
                info!(generation, "Session changed during refresh, discarding result");
                Err(SessionError::SessionExpired)
            }
        }
        Err(e) => {
            if store.clear_if_epoch(epoch) {
                warn!(generation, error = %e, "Token refresh failed, ending session");
                session_lost = true;
            } else {
                info!(generation, error = %e, "Token refresh failed after session changed");
            }
            Err(SessionError::from_api(AuthOperation::Refresh, e))
        }
    };

    {
        let mut slot = lock(&pending);
        if slot.as_ref().map(|p| p.generation) == Some(generation) {
            *slot = None;
        }
    }

    if session_lost {
        let hook = lock(&on_expired).clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    result
}

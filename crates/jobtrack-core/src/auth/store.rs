use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::credential::{Credential, SessionState};
use super::vault::RefreshTokenVault;

/// Callback invoked with the freshly derived state after every `set`/`clear`.
pub type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Single owner of the current [`Credential`].
///
/// Access token and expiry are held in memory only; the refresh token is
/// mirrored into a [`RefreshTokenVault`]. Only the refresh coordinator and
/// the session controller mutate the store.
pub struct CredentialStore {
    credential: RwLock<Option<Credential>>,
    // Bumped by every set/clear; lets a slow writer detect it was overtaken.
    epoch: AtomicU64,
    // Vault contents as last read or written. `None` until first looked up.
    vaulted: Mutex<Option<Option<String>>>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    // Held across mutate + notify so notifications never interleave.
    notify_order: Mutex<()>,
    vault: Arc<dyn RefreshTokenVault>,
    leeway: Duration,
}

/// Handle returned by [`CredentialStore::subscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialStore {
    pub fn new(vault: Arc<dyn RefreshTokenVault>, leeway: Duration) -> Self {
        Self {
            credential: RwLock::new(None),
            epoch: AtomicU64::new(0),
            vaulted: Mutex::new(None),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            notify_order: Mutex::new(()),
            vault,
            leeway,
        }
    }

    /// Current session state, re-derived against the clock on every call.
    pub fn get(&self) -> SessionState {
        let guard = self.credential.read().unwrap_or_else(PoisonError::into_inner);
        SessionState::derive(guard.as_ref(), Utc::now(), self.leeway)
    }

    /// Raw snapshot of the stored credential, expired or not.
    pub fn credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refresh token for the next exchange: the in-memory one, else whatever
    /// a previous process left in the vault.
    pub fn refresh_token(&self) -> Option<String> {
        if let Some(token) = self.credential().and_then(|c| c.refresh_token().map(str::to_string)) {
            return Some(token);
        }
        let mut vaulted = lock(&self.vaulted);
        if let Some(cached) = vaulted.as_ref() {
            return cached.clone();
        }
        match self.vault.load() {
            Ok(token) => {
                *vaulted = Some(token.clone());
                token
            }
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token from vault");
                None
            }
        }
    }

    /// Current write epoch. Any `set` or `clear` moves it forward.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Replace the credential wholesale and notify subscribers.
    pub fn set(&self, credential: Credential) {
        let _order = lock(&self.notify_order);
        self.write(credential);
    }

    /// Like [`Self::set`], but only if nothing has written to the store
    /// since `epoch` was read. Returns whether the credential was stored.
    pub fn set_if_epoch(&self, credential: Credential, epoch: u64) -> bool {
        let _order = lock(&self.notify_order);
        if self.epoch() != epoch {
            debug!(expected = epoch, current = self.epoch(), "Store moved on, dropping credential");
            return false;
        }
        self.write(credential);
        true
    }

    /// Remove the credential (and the vaulted refresh token) and notify subscribers.
    pub fn clear(&self) {
        let _order = lock(&self.notify_order);
        self.erase();
    }

    /// Like [`Self::clear`], but only if nothing has written to the store
    /// since `epoch` was read. Returns whether the store was cleared.
    pub fn clear_if_epoch(&self, epoch: u64) -> bool {
        let _order = lock(&self.notify_order);
        if self.epoch() != epoch {
            debug!(expected = epoch, current = self.epoch(), "Store moved on, not clearing");
            return false;
        }
        self.erase();
        true
    }

    // Callers hold `notify_order`.
    fn write(&self, credential: Credential) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let persisted = match credential.refresh_token() {
            Some(token) => self.vault.store(token),
            None => self.vault.delete(),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist refresh token");
        }
        *lock(&self.vaulted) = Some(credential.refresh_token().map(str::to_string));

        debug!(
            subject = %credential.subject_id(),
            expires_at = %credential.expires_at(),
            "Credential stored"
        );
        *self.credential.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);

        self.notify();
    }

    // Callers hold `notify_order`.
    fn erase(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.vault.delete() {
            warn!(error = %e, "Failed to delete refresh token");
        }
        *lock(&self.vaulted) = Some(None);
        let had_credential = self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        debug!(had_credential, "Credential cleared");

        self.notify();
    }

    /// Register a listener. Listeners run synchronously in registration
    /// order and must not call `set`/`clear` themselves.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn notify(&self) {
        let state = self.get();
        // Snapshot so listeners may subscribe/unsubscribe without deadlocking.
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&state);
        }
    }
}

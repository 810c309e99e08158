//! Refresh token persistence.
//!
//! The refresh token is the only long-lived secret of a session. It is kept
//! in the OS keychain, never in the config or cache files.

use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "jobtrack";

/// Keychain account under which the refresh token is stored.
const REFRESH_TOKEN_ACCOUNT: &str = "refresh-token";

/// Storage for the refresh token.
pub trait RefreshTokenVault: Send + Sync {
    fn store(&self, token: &str) -> Result<()>;
    fn load(&self) -> Result<Option<String>>;
    fn delete(&self) -> Result<()>;
}

/// OS keychain vault.
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a separate keychain service, e.g. one per API environment.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, REFRESH_TOKEN_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshTokenVault for KeyringVault {
    fn store(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store refresh token in keychain")
    }

    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve refresh token from keychain"),
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete refresh token from keychain"),
        }
    }
}

/// Process-local vault for tests and sessions that must not outlive the process.
#[derive(Default)]
pub struct MemoryVault {
    token: Mutex<Option<String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RefreshTokenVault for MemoryVault {
    fn store(&self, token: &str) -> Result<()> {
        *self.slot() = Some(token.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>> {
        Ok(self.slot().clone())
    }

    fn delete(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

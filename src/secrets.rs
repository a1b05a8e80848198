use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::SecretString;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

pub const AUTH_TOKEN_ACCOUNT: &str = "authToken";

/// Read-only view over the durable slot the login flow writes the bearer
/// token into.
#[derive(Clone)]
pub struct SecretVault {
    service_name: String,
    backend: SecretBackend,
}

#[derive(Clone)]
enum SecretBackend {
    Keyring,
    Memory(Arc<Mutex<HashMap<String, SecretString>>>),
}

impl SecretVault {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            backend: SecretBackend::Keyring,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            service_name: "in-memory".to_string(),
            backend: SecretBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Seeds an in-memory vault; the keyring backend is never written here.
    pub fn with_secret(self, account: &str, value: impl Into<String>) -> Self {
        if let SecretBackend::Memory(store) = &self.backend {
            store
                .lock()
                .insert(account.to_string(), SecretString::from(value.into()));
        }
        self
    }

    pub fn read_secret(&self, account: &str) -> AppResult<Option<SecretString>> {
        match &self.backend {
            SecretBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                match entry.get_password() {
                    Ok(value) => Ok(Some(SecretString::from(value))),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            SecretBackend::Memory(store) => Ok(store.lock().get(account).cloned()),
        }
    }

    /// Token to authorize the transport with. The environment override wins
    /// over the stored slot.
    pub fn auth_token(&self, config: &AppConfig) -> AppResult<Option<SecretString>> {
        if let Some(token) = &config.auth_token {
            debug!(
                target: "secret_vault",
                service = %self.service_name,
                "using auth token from environment"
            );
            return Ok(Some(token.clone()));
        }
        let token = self.read_secret(AUTH_TOKEN_ACCOUNT)?;
        debug!(
            target: "secret_vault",
            service = %self.service_name,
            found = token.is_some(),
            "looked up stored auth token"
        );
        Ok(token)
    }
}

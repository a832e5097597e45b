use crate::domain::error::{AppError, Result};
use keyring::Entry;

/// Secrets stored in the OS credential store under one service name.
pub struct KeyringManager {
    service: String,
}

impl KeyringManager {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        Entry::new(&self.service, name).map_err(|e| {
            AppError::SecurityError(format!(
                "Keyring entry {}/{} unavailable: {}",
                self.service, name, e
            ))
        })
    }

    pub fn set_secret(&self, name: &str, secret: &str) -> Result<()> {
        self.entry(name)?
            .set_password(secret)
            .map_err(|e| AppError::SecurityError(format!("Failed to store {}: {}", name, e)))
    }

    pub fn get_secret(&self, name: &str) -> Result<String> {
        self.entry(name)?
            .get_password()
            .map_err(|e| AppError::SecurityError(format!("No stored {}: {}", name, e)))
    }
}

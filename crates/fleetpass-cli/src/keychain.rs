use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "fleetpass";

/// Login secrets kept in the OS keychain, keyed by identifier.
pub struct SecretStore;

impl SecretStore {
    /// Store the secret for an identifier in the OS keychain
    pub fn store(identifier: &str, secret: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, identifier)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(secret)
            .context("Failed to store secret in keychain")?;
        Ok(())
    }

    /// Retrieve the secret for an identifier, if one was saved
    pub fn get(identifier: &str) -> Result<Option<String>> {
        let entry = Entry::new(SERVICE_NAME, identifier)
            .context("Failed to create keyring entry")?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve secret from keychain"),
        }
    }

    /// Delete the stored secret. Returns false when nothing was saved.
    pub fn delete(identifier: &str) -> Result<bool> {
        let entry = Entry::new(SERVICE_NAME, identifier)
            .context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete secret from keychain"),
        }
    }
}

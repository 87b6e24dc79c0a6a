//! API key storage in the system keychain.
//!
//! [`populate_env_from_keychain`] copies stored keys into the
//! environment at startup so [`crate::config::fetch_config`] picks them up
//! like any other credential.

use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Keychain service name used for all stored credentials.
const SERVICE: &str = "bitx-stream";

/// API credential entries managed by this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKey {
    ApiKeyId,
    ApiKeySecret,
}

impl CredentialKey {
    pub fn keyring_id(self) -> &'static str {
        match self {
            Self::ApiKeyId => "api_key_id",
            Self::ApiKeySecret => "api_key_secret",
        }
    }

    /// Environment variable the config layer reads this key from.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::ApiKeyId => "BITX_API_KEY_ID",
            Self::ApiKeySecret => "BITX_API_KEY_SECRET",
        }
    }

    pub const ALL: [CredentialKey; 2] = [Self::ApiKeyId, Self::ApiKeySecret];
}

/// Loads a credential from the keychain, returning `None` if not set.
pub fn load(key: CredentialKey) -> Option<Zeroizing<String>> {
    let entry = keyring::Entry::new(SERVICE, key.keyring_id()).ok()?;
    match entry.get_password() {
        Ok(password) => Some(Zeroizing::new(password)),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key = key.keyring_id(), error = %e, "Failed to read keychain entry");
            None
        }
    }
}

/// Saves a credential to the keychain.
///
/// # Errors
///
/// Returns [`StreamError::Config`](crate::StreamError::Config) if the
/// keychain rejects the entry.
pub fn save(key: CredentialKey, value: &str) -> crate::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.keyring_id())
        .map_err(|e| crate::StreamError::Config(format!("keyring entry error: {e}")))?;
    entry
        .set_password(value)
        .map_err(|e| crate::StreamError::Config(format!("failed to save to keychain: {e}")))
}

pub fn is_set(key: CredentialKey) -> bool {
    load(key).is_some()
}

/// Sets the environment variable of every stored credential that is not
/// already present in the environment.
///
/// Must run before any other thread is started.
pub fn populate_env_from_keychain() {
    for key in CredentialKey::ALL {
        if std::env::var(key.env_var()).is_err()
            && let Some(value) = load(key)
        {
            debug!(key = key.env_var(), "Loaded credential from keychain");
            // SAFETY: called from `main` before the runtime spawns threads.
            unsafe {
                std::env::set_var(key.env_var(), value.as_str());
            }
        }
    }
}

//! OS keychain backend. Values are stored base64-encoded as the credential
//! password, one entry per key under a single service name.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::storage::SecureStore;

pub const DEFAULT_KEYCHAIN_SERVICE: &str = "app.rendezvous.e2ee";

pub struct KeychainStore {
    service: String,
}

impl KeychainStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYCHAIN_SERVICE)
    }
}

// Keychain calls block on platform IPC, so each runs on the blocking pool.
#[async_trait]
impl SecureStore for KeychainStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, CryptoError> {
            let entry = keyring::Entry::new(&service, &key)?;
            match entry.get_password() {
                Ok(encoded) => {
                    let encoded = Zeroizing::new(encoded);
                    let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|_| {
                        CryptoError::KeychainError(format!("malformed keychain entry {key}"))
                    })?;
                    Ok(Some(bytes))
                }
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(CryptoError::from(e)),
            }
        })
        .await?
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CryptoError> {
        let service = self.service.clone();
        let key = key.to_string();
        let encoded = Zeroizing::new(STANDARD.encode(value));
        tokio::task::spawn_blocking(move || -> Result<_, CryptoError> {
            keyring::Entry::new(&service, &key)?.set_password(&encoded)?;
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> Result<(), CryptoError> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, CryptoError> {
            match keyring::Entry::new(&service, &key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(CryptoError::from(e)),
            }
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_app_service_name() {
        assert_eq!(KeychainStore::default().service(), DEFAULT_KEYCHAIN_SERVICE);
        assert_eq!(KeychainStore::new("custom").service(), "custom");
    }
}

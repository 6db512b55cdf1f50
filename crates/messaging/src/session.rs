//! Per-session state shared by every orchestrator call.

use std::sync::Arc;

use rendezvous_crypto::error::CryptoError;
use rendezvous_crypto::identity::IdentityCache;
use rendezvous_crypto::pinning::PinCache;
use rendezvous_crypto::storage::{KeychainStore, SecureStore, SqliteStore};

use crate::config::MessagingConfig;
use crate::protocol::ProtocolSelector;

/// Caches that live for one signed-in session: loaded identities, loaded
/// pin sets and the protocol decision. Dropping it forgets all three; the
/// secure store keeps the keys and pins.
pub struct SessionCache {
    pub identities: Arc<IdentityCache>,
    pub pins: Arc<PinCache>,
    pub protocol: Arc<ProtocolSelector>,
}

impl SessionCache {
    pub fn new(force_legacy: bool) -> Self {
        Self {
            identities: Arc::new(IdentityCache::new()),
            pins: Arc::new(PinCache::new()),
            protocol: Arc::new(ProtocolSelector::new(force_legacy)),
        }
    }

    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(config.force_legacy)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Open the secure store selected by `config`: SQLCipher keyed from the
/// keychain when `secure_store_path` is set, the keychain itself otherwise.
pub fn open_secure_store(config: &MessagingConfig) -> Result<Arc<dyn SecureStore>, CryptoError> {
    match &config.secure_store_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::open_with_keychain(path, &config.keyring_service)?;
            tracing::info!(path = %path.display(), "opened encrypted secure store");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(KeychainStore::new(config.keyring_service.clone()))),
    }
}

//! Secure device-local key-value storage.
//!
//! Device identities and pinned fingerprints are persisted through the
//! [`SecureStore`] trait under owner-scoped keys. Backends: OS keychain,
//! SQLCipher-encrypted SQLite, and an in-memory map for tests and ephemeral
//! sessions.

pub mod keychain;
pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;
use rendezvous_shared::ids::UserId;

use crate::error::CryptoError;

pub use keychain::KeychainStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Installation-wide device id, shared by every account on this device.
pub const INSTALLATION_DEVICE_ID_KEY: &str = "installation.device_id";

pub fn device_identity_key(user_id: &UserId) -> String {
    format!("identity.v2.{user_id}")
}

pub fn legacy_identity_key(user_id: &UserId) -> String {
    format!("identity.v1.{user_id}")
}

pub fn pinned_fingerprints_key(owner: &UserId) -> String {
    format!("pins.{owner}")
}

/// Device-exclusive key-value storage for secret material.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CryptoError>;

    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CryptoError>;
}

/// In-memory SQLCipher database with a fixed test key and migrations applied.
#[cfg(test)]
pub(crate) fn init_test_db() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA key = \"x'0000000000000000000000000000000000000000000000000000000000000000'\";",
    )
    .unwrap();
    migrations::run_store_migrations(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_scoped_keys_do_not_collide() {
        let user = UserId::new();
        let keys = [
            device_identity_key(&user),
            legacy_identity_key(&user),
            pinned_fingerprints_key(&user),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
        assert!(keys.iter().all(|k| k.contains(&user.to_string())));
        assert_ne!(device_identity_key(&UserId::new()), keys[0]);
    }
}

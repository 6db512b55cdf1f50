//! Keys protecting the SQLCipher secure store.
//!
//! The [`MasterKey`] is 32 random bytes kept in the OS keychain, or derived
//! from a passphrase with Argon2id where no keychain exists. The database is
//! never keyed with it directly: [`MasterKey::store_key`] expands it with
//! HKDF-SHA256 under a fixed label into a [`StoreKey`].

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

const KEYCHAIN_ACCOUNT: &str = "secure_store_master_key";
const STORE_KEY_LABEL: &[u8] = b"rendezvous-secure-store-v1";
pub const SALT_LEN: usize = 16;

// Argon2id: 64 MiB, 3 passes, 4 lanes.
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_PASSES: u32 = 3;
const ARGON2_LANES: u32 = 4;

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// Load the master key stored under `service`, creating it on first use.
    pub fn from_keychain(service: &str) -> Result<Self, CryptoError> {
        let entry = keyring::Entry::new(service, KEYCHAIN_ACCOUNT)
            .map_err(|_| CryptoError::KeychainUnavailable)?;

        let stored = match entry.get_password() {
            Ok(stored) => Zeroizing::new(stored),
            Err(keyring::Error::NoEntry) => {
                let key = Self::random();
                entry.set_password(&Zeroizing::new(hex::encode(key.0)))?;
                tracing::info!(service, "created secure store master key");
                return Ok(key);
            }
            Err(err) => return Err(err.into()),
        };

        let malformed = || CryptoError::KeychainError("stored master key is malformed".into());
        let bytes = Zeroizing::new(hex::decode(stored.as_str()).map_err(|_| malformed())?);
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| malformed())?;
        Ok(Self(key))
    }

    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        if salt.len() < SALT_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "salt must be at least {SALT_LEN} bytes"
            )));
        }

        let params = argon2::Params::new(ARGON2_MEMORY_KIB, ARGON2_PASSES, ARGON2_LANES, Some(32))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut key = [0u8; 32];
        argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    fn random() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn store_key(&self) -> Result<StoreKey, CryptoError> {
        let mut okm = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(None, &self.0)
            .expand(STORE_KEY_LABEL, &mut okm[..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(StoreKey(format!("x'{}'", Zeroizing::new(hex::encode(&okm[..])).as_str())))
    }
}

/// Fresh random salt for [`MasterKey::from_passphrase`].
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// SQLCipher raw key literal, `x'<64 hex>'`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKey(String);

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey([REDACTED])")
    }
}

impl StoreKey {
    /// Key `conn` and set the connection pragmas. Fails if the linked SQLite
    /// has no SQLCipher support.
    pub fn apply(&self, conn: &rusqlite::Connection) -> Result<(), CryptoError> {
        // Inlined on purpose: a bound parameter is treated as a passphrase.
        conn.execute_batch(&format!("PRAGMA key = \"{}\";", self.0))?;

        let cipher_version: Option<String> = conn
            .pragma_query_value(None, "cipher_version", |row| row.get(0))
            .ok();
        if cipher_version.as_deref().map_or(true, str::is_empty) {
            return Err(CryptoError::StorageError("SQLCipher not available".into()));
        }

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(())
    }

    #[cfg(test)]
    fn literal(&self) -> &str {
        &self.0
    }
}

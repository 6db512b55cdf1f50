//! SQLCipher-encrypted SQLite backend.
//!
//! The database key is derived from a master key (OS keychain or passphrase)
//! via [`crate::master_key`]. The connection is shared behind a mutex and every query
//! runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use crate::error::CryptoError;
use crate::master_key::{MasterKey, StoreKey};
use crate::storage::migrations::run_store_migrations;
use crate::storage::SecureStore;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) an encrypted store at `path` with an explicit key.
    pub fn open(path: &Path, store_key: &StoreKey) -> Result<Self, CryptoError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, store_key)
    }

    /// Open a store whose key is derived from the keychain-held master key.
    pub fn open_with_keychain(path: &Path, keychain_service: &str) -> Result<Self, CryptoError> {
        let store_key = MasterKey::from_keychain(keychain_service)?.store_key()?;
        Self::open(path, &store_key)
    }

    /// Open a store whose key is derived from a user passphrase.
    pub fn open_with_passphrase(
        path: &Path,
        passphrase: &str,
        salt: &[u8],
    ) -> Result<Self, CryptoError> {
        let store_key = MasterKey::from_passphrase(passphrase, salt)?.store_key()?;
        Self::open(path, &store_key)
    }

    pub fn open_in_memory(store_key: &StoreKey) -> Result<Self, CryptoError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, store_key)
    }

    fn from_connection(conn: Connection, store_key: &StoreKey) -> Result<Self, CryptoError> {
        store_key.apply(&conn)?;
        run_store_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CryptoError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CryptoError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CryptoError::StorageError("secure store lock poisoned".into()))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl SecureStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM secure_kv WHERE key = ?1",
                    [&key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CryptoError> {
        let key = key.to_string();
        let value = value.to_vec();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                "INSERT INTO secure_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CryptoError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM secure_kv WHERE key = ?1", [&key])?;
            Ok(())
        })
        .await
    }
}

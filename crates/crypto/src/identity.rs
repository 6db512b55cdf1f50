//! Device identity management.
//!
//! Each (user, installation) pair owns one X25519 key pair. The secret half
//! is persisted in the [`SecureStore`] and never leaves the device; the
//! public projection is published to the backend [`DeviceDirectory`] so
//! peers can address this device. The device id is generated once per
//! installation and shared by every account signed in on it.
//!
//! The single-key protocol keeps its own per-account key pair, managed here
//! as a [`LegacyIdentity`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rendezvous_shared::api::device::{DeviceDirectoryRow, LegacyKeyRow};
use rendezvous_shared::constants::CURRENT_KEY_VERSION;
use rendezvous_shared::ids::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::directory::DeviceDirectory;
use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey, SecretKey};
use crate::storage::{self, SecureStore};
use crate::version::ProtocolVersion;

/// This device's identity for one user.
#[derive(Clone)]
pub struct DeviceIdentity {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub version: ProtocolVersion,
    pub key_version: u32,
    keypair: KeyPair,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("version", &self.version)
            .field("key_version", &self.key_version)
            .field("public_key", self.keypair.public())
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    pub fn new(user_id: UserId, device_id: DeviceId, keypair: KeyPair) -> Self {
        Self {
            user_id,
            device_id,
            version: ProtocolVersion::V2,
            key_version: CURRENT_KEY_VERSION,
            keypair,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public()
    }

    pub fn secret_key(&self) -> &SecretKey {
        self.keypair.secret()
    }

    pub fn public_identity(&self) -> DevicePublicIdentity {
        DevicePublicIdentity {
            user_id: self.user_id,
            device_id: self.device_id,
            public_key: *self.keypair.public(),
            key_version: self.key_version,
        }
    }

    /// This device as an envelope recipient.
    pub fn as_recipient(&self) -> RecipientDevice {
        self.public_identity().into()
    }
}

/// The shareable half of a [`DeviceIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePublicIdentity {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub public_key: PublicKey,
    pub key_version: u32,
}

impl DevicePublicIdentity {
    pub fn to_directory_row(&self, last_seen_at: DateTime<Utc>) -> DeviceDirectoryRow {
        DeviceDirectoryRow {
            user_id: self.user_id,
            device_id: self.device_id,
            public_key: self.public_key.to_base64(),
            key_version: self.key_version,
            revoked: false,
            last_seen_at,
        }
    }
}

/// A validated peer device taken from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientDevice {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub public_key: PublicKey,
    pub key_version: u32,
}

impl RecipientDevice {
    pub fn from_directory_row(row: &DeviceDirectoryRow) -> Result<Self, CryptoError> {
        let public_key = PublicKey::from_base64(&row.public_key).map_err(|e| {
            CryptoError::InvalidRecipient(format!(
                "device {} of user {}: {e}",
                row.device_id, row.user_id
            ))
        })?;
        Ok(Self {
            user_id: row.user_id,
            device_id: row.device_id,
            public_key,
            key_version: row.key_version,
        })
    }
}

impl From<DevicePublicIdentity> for RecipientDevice {
    fn from(identity: DevicePublicIdentity) -> Self {
        Self {
            user_id: identity.user_id,
            device_id: identity.device_id,
            public_key: identity.public_key,
            key_version: identity.key_version,
        }
    }
}

/// Per-account key pair used by the single-key protocol.
#[derive(Clone)]
pub struct LegacyIdentity {
    pub user_id: UserId,
    keypair: KeyPair,
}

impl std::fmt::Debug for LegacyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyIdentity")
            .field("user_id", &self.user_id)
            .field("public_key", self.keypair.public())
            .finish_non_exhaustive()
    }
}

impl LegacyIdentity {
    pub fn new(user_id: UserId, keypair: KeyPair) -> Self {
        Self { user_id, keypair }
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public()
    }

    pub fn secret_key(&self) -> &SecretKey {
        self.keypair.secret()
    }
}

/// Secure store record for a device identity.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    user_id: UserId,
    device_id: DeviceId,
    key_version: u32,
    secret_key: String,
    created_at: DateTime<Utc>,
}

/// Secure store record for a legacy identity.
#[derive(Serialize, Deserialize)]
struct StoredLegacyIdentity {
    user_id: UserId,
    secret_key: String,
}

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// Session-scoped identity cache.
///
/// Each user gets an async slot; holding the slot's lock across the
/// load-or-create sequence serializes concurrent first calls for that user.
#[derive(Default)]
pub struct IdentityCache {
    device: DashMap<UserId, Slot<DeviceIdentity>>,
    legacy: DashMap<UserId, Slot<LegacyIdentity>>,
    installation: Mutex<Option<DeviceId>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn device_slot(&self, user_id: UserId) -> Slot<DeviceIdentity> {
        self.device.entry(user_id).or_default().clone()
    }

    fn legacy_slot(&self, user_id: UserId) -> Slot<LegacyIdentity> {
        self.legacy.entry(user_id).or_default().clone()
    }

    /// Drop the cached identities of one user (sign-out). Stored keys stay.
    pub fn evict(&self, user_id: &UserId) {
        self.device.remove(user_id);
        self.legacy.remove(user_id);
    }
}

pub struct IdentityManager {
    store: Arc<dyn SecureStore>,
    directory: Arc<dyn DeviceDirectory>,
    cache: Arc<IdentityCache>,
}

impl IdentityManager {
    pub fn new(
        store: Arc<dyn SecureStore>,
        directory: Arc<dyn DeviceDirectory>,
        cache: Arc<IdentityCache>,
    ) -> Self {
        Self {
            store,
            directory,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Load this device's identity for `user_id`, creating and persisting
    /// one on first use. Never replaces an existing key pair.
    pub async fn get_or_create_identity(
        &self,
        user_id: UserId,
    ) -> Result<Arc<DeviceIdentity>, CryptoError> {
        let slot = self.cache.device_slot(user_id);
        let mut guard = slot.lock().await;
        if let Some(identity) = guard.as_ref() {
            return Ok(Arc::clone(identity));
        }

        let key = storage::device_identity_key(&user_id);
        let identity = match self.store.get(&key).await? {
            Some(bytes) => decode_device_identity(user_id, &bytes)?,
            None => {
                let device_id = self.installation_device_id().await?;
                let identity = DeviceIdentity::new(user_id, device_id, KeyPair::generate());
                let record = StoredIdentity {
                    user_id,
                    device_id,
                    key_version: identity.key_version,
                    secret_key: identity.secret_key().to_base64().to_string(),
                    created_at: Utc::now(),
                };
                let encoded = Zeroizing::new(serde_json::to_vec(&record)?);
                drop(Zeroizing::new(record.secret_key));
                self.store
                    .set(&storage::legacy_identity_key(&user_id), &encoded)
                    .await?;
                tracing::info!(%user_id, %device_id, "created device identity");
                identity
            }
        };

        let identity = Arc::new(identity);
        *guard = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Publish the public projection of `identity` to the directory.
    ///
    /// Failures are retryable and leave the local identity in place.
    pub async fn sync_to_directory(&self, identity: &DeviceIdentity) -> Result<(), CryptoError> {
        let row = identity.public_identity().to_directory_row(Utc::now());
        match self.directory.upsert_device(&row).await {
            Ok(()) => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    device_id = %identity.device_id,
                    "device identity synced"
                );
                Ok(())
            }
            Err(err) => {
                let err = CryptoError::from_backend_write(err);
                tracing::warn!(
                    user_id = %identity.user_id,
                    device_id = %identity.device_id,
                    kind = %err.kind(),
                    "device identity sync failed"
                );
                Err(err)
            }
        }
    }

    /// Active devices of every user in `user_ids`, in one directory query.
    pub async fn fetch_recipient_directory(
        &self,
        user_ids: &[UserId],
    ) -> Result<Vec<RecipientDevice>, CryptoError> {
        let mut seen = HashSet::with_capacity(user_ids.len());
        let wanted: Vec<UserId> = user_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .directory
            .fetch_devices(&wanted)
            .await
            .map_err(CryptoError::from_backend_read)?;

        let devices = rows
            .iter()
            .filter(|row| !row.revoked && seen.contains(&row.user_id))
            .map(RecipientDevice::from_directory_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            users = wanted.len(),
            devices = devices.len(),
            "fetched recipient directory"
        );
        Ok(devices)
    }

    /// Load or create the per-account key pair of the single-key protocol.
    pub async fn get_or_create_legacy_identity(
        &self,
        user_id: UserId,
    ) -> Result<Arc<LegacyIdentity>, CryptoError> {
        let slot = self.cache.legacy_slot(user_id);
        let mut guard = slot.lock().await;
        if let Some(identity) = guard.as_ref() {
            return Ok(Arc::clone(identity));
        }

        let identity = match self.read_legacy_identity(user_id).await? {
            Some(identity) => identity,
            None => {
                let identity = LegacyIdentity::new(user_id, KeyPair::generate());
                let record = StoredLegacyIdentity {
                    user_id,
                    secret_key: identity.secret_key().to_base64().to_string(),
                };
                let encoded = Zeroizing::new(serde_json::to_vec(&record)?);
                drop(Zeroizing::new(record.secret_key));
                self.store
                    .set(&storage::legacy_identity_key(&user_id), &encoded)
                    .await?;
                tracing::info!(%user_id, "created legacy identity");
                identity
            }
        };

        let identity = Arc::new(identity);
        *guard = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// The stored per-account key pair of `user_id`. Never creates one, so
    /// reading old history cannot replace the account's published key.
    pub async fn load_legacy_identity(
        &self,
        user_id: UserId,
    ) -> Result<Option<Arc<LegacyIdentity>>, CryptoError> {
        let slot = self.cache.legacy_slot(user_id);
        let mut guard = slot.lock().await;
        if let Some(identity) = guard.as_ref() {
            return Ok(Some(Arc::clone(identity)));
        }

        let Some(identity) = self.read_legacy_identity(user_id).await? else {
            return Ok(None);
        };
        let identity = Arc::new(identity);
        *guard = Some(Arc::clone(&identity));
        Ok(Some(identity))
    }

    async fn read_legacy_identity(&self, user_id: UserId) -> Result<Option<LegacyIdentity>, CryptoError> {
        let Some(bytes) = self.store.get(&storage::legacy_identity_key(&user_id)).await? else {
            return Ok(None);
        };
        let record: StoredLegacyIdentity = serde_json::from_slice(&bytes)?;
        let secret_key = Zeroizing::new(record.secret_key);
        let keypair = KeyPair::from_secret(SecretKey::from_base64(&secret_key)?);
        Ok(Some(LegacyIdentity::new(user_id, keypair)))
    }

    pub async fn publish_legacy_key(&self, identity: &LegacyIdentity) -> Result<(), CryptoError> {
        let row = LegacyKeyRow {
            user_id: identity.user_id,
            public_key: identity.public_key().to_base64(),
        };
        self.directory
            .publish_legacy_key(&row)
            .await
            .map_err(CryptoError::from_backend_write)
    }

    /// The published single-key protocol key of `user_id`.
    pub async fn fetch_legacy_key(&self, user_id: UserId) -> Result<PublicKey, CryptoError> {
        let rows = self
            .directory
            .fetch_legacy_keys(&[user_id])
            .await
            .map_err(CryptoError::from_backend_read)?;
        let row = rows
            .into_iter()
            .find(|row| row.user_id == user_id)
            .ok_or_else(|| {
                CryptoError::InvalidRecipient(format!("no legacy key published for user {user_id}"))
            })?;
        PublicKey::from_base64(&row.public_key)
            .map_err(|e| CryptoError::InvalidRecipient(format!("legacy key of user {user_id}: {e}")))
    }

    async fn installation_device_id(&self) -> Result<DeviceId, CryptoError> {
        let mut guard = self.cache.installation.lock().await;
        if let Some(id) = *guard {
            return Ok(id);
        }

        let id = match self.store.get(storage::INSTALLATION_DEVICE_ID_KEY).await? {
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<DeviceId>().ok())
                .ok_or_else(|| CryptoError::StorageError("malformed installation device id".into()))?,
            None => {
                let id = DeviceId::new();
                self.store
                    .set(storage::INSTALLATION_DEVICE_ID_KEY, id.to_string().as_bytes())
                    .await?;
                tracing::info!(device_id = %id, "registered installation device id");
                id
            }
        };

        *guard = Some(id);
        Ok(id)
    }
}

fn decode_device_identity(user_id: UserId, bytes: &[u8]) -> Result<DeviceIdentity, CryptoError> {
    let record: StoredIdentity = serde_json::from_slice(bytes)?;
    let secret_key = Zeroizing::new(record.secret_key);
    if record.user_id != user_id {
        return Err(CryptoError::StorageError(
            "stored identity belongs to another user".into(),
        ));
    }
    let keypair = KeyPair::from_secret(SecretKey::from_base64(&secret_key)?);
    Ok(DeviceIdentity {
        user_id,
        device_id: record.device_id,
        version: ProtocolVersion::V2,
        key_version: record.key_version,
        keypair,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use rendezvous_shared::error::BackendError;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeDirectory {
        devices: StdMutex<Vec<DeviceDirectoryRow>>,
        legacy: StdMutex<Vec<LegacyKeyRow>>,
        fail_with: StdMutex<Option<BackendError>>,
        fetch_calls: StdMutex<usize>,
    }

    impl FakeDirectory {
        fn failing(err: BackendError) -> Self {
            let dir = Self::default();
            *dir.fail_with.lock().unwrap() = Some(err);
            dir
        }

        fn check(&self) -> Result<(), BackendError> {
            match self.fail_with.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl DeviceDirectory for FakeDirectory {
        async fn upsert_device(&self, row: &DeviceDirectoryRow) -> Result<(), BackendError> {
            self.check()?;
            let mut devices = self.devices.lock().unwrap();
            devices.retain(|r| !(r.user_id == row.user_id && r.device_id == row.device_id));
            devices.push(row.clone());
            Ok(())
        }

        async fn fetch_devices(
            &self,
            user_ids: &[UserId],
        ) -> Result<Vec<DeviceDirectoryRow>, BackendError> {
            *self.fetch_calls.lock().unwrap() += 1;
            self.check()?;
            Ok(self
                .devices
                .lock()
                .unwrap()
                .iter()
                .filter(|r| user_ids.contains(&r.user_id))
                .cloned()
                .collect())
        }

        async fn publish_legacy_key(&self, row: &LegacyKeyRow) -> Result<(), BackendError> {
            self.check()?;
            let mut legacy = self.legacy.lock().unwrap();
            legacy.retain(|r| r.user_id != row.user_id);
            legacy.push(row.clone());
            Ok(())
        }

        async fn fetch_legacy_keys(
            &self,
            user_ids: &[UserId],
        ) -> Result<Vec<LegacyKeyRow>, BackendError> {
            self.check()?;
            Ok(self
                .legacy
                .lock()
                .unwrap()
                .iter()
                .filter(|r| user_ids.contains(&r.user_id))
                .cloned()
                .collect())
        }
    }

    fn manager_with(
        store: Arc<MemoryStore>,
        directory: Arc<FakeDirectory>,
    ) -> IdentityManager {
        IdentityManager::new(store, directory, Arc::new(IdentityCache::new()))
    }

    fn row_for(user_id: UserId, public_key: String, revoked: bool) -> DeviceDirectoryRow {
        DeviceDirectoryRow {
            user_id,
            device_id: DeviceId::new(),
            public_key,
            key_version: CURRENT_KEY_VERSION,
            revoked,
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_or_create_identity_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store.clone(), Arc::new(FakeDirectory::default()));
        let user = UserId::new();

        let first = manager.get_or_create_identity(user).await.unwrap();
        let second = manager.get_or_create_identity(user).await.unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.version, ProtocolVersion::V2);
    }

    #[tokio::test]
    async fn identity_survives_a_fresh_session() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new();

        let first = manager_with(store.clone(), Arc::new(FakeDirectory::default()))
            .get_or_create_identity(user)
            .await
            .unwrap();
        let reloaded = manager_with(store, Arc::new(FakeDirectory::default()))
            .get_or_create_identity(user)
            .await
            .unwrap();

        assert_eq!(first.public_key(), reloaded.public_key());
        assert_eq!(first.device_id, reloaded.device_id);
    }

    #[tokio::test]
    async fn concurrent_first_calls_create_one_key_pair() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(manager_with(store, Arc::new(FakeDirectory::default())));
        let user = UserId::new();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create_identity(user).await.unwrap() })
            })
            .collect();

        let mut keys = HashSet::new();
        for task in tasks {
            keys.insert(*task.await.unwrap().public_key());
        }
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn accounts_on_one_installation_share_the_device_id() {
        let manager = manager_with(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeDirectory::default()),
        );
        let a = manager.get_or_create_identity(UserId::new()).await.unwrap();
        let b = manager.get_or_create_identity(UserId::new()).await.unwrap();
        assert_eq!(a.device_id, b.device_id);
        assert_ne!(a.public_key(), b.public_key());
    }

    #[tokio::test]
    async fn sync_publishes_public_projection() {
        let directory = Arc::new(FakeDirectory::default());
        let manager = manager_with(Arc::new(MemoryStore::new()), directory.clone());
        let identity = manager.get_or_create_identity(UserId::new()).await.unwrap();

        manager.sync_to_directory(&identity).await.unwrap();

        let rows = directory.devices.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, identity.device_id);
        assert_eq!(rows[0].public_key, identity.public_key().to_base64());
        assert!(!rows[0].revoked);
    }

    #[tokio::test]
    async fn sync_against_missing_schema_keeps_local_identity() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(FakeDirectory::failing(BackendError::SchemaUnavailable(
            "user_devices".into(),
        )));
        let manager = manager_with(store.clone(), directory);
        let user = UserId::new();
        let identity = manager.get_or_create_identity(user).await.unwrap();

        let err = manager.sync_to_directory(&identity).await.unwrap_err();
        assert!(matches!(err, CryptoError::SchemaUnavailable(_)));
        assert!(err.is_retryable());

        let again = manager.get_or_create_identity(user).await.unwrap();
        assert_eq!(again.public_key(), identity.public_key());
        assert!(store.get(&storage::device_identity_key(&user)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sync_write_failure_is_sync_failed() {
        let manager = manager_with(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeDirectory::failing(BackendError::Unavailable("503".into()))),
        );
        let identity = manager.get_or_create_identity(UserId::new()).await.unwrap();
        let err = manager.sync_to_directory(&identity).await.unwrap_err();
        assert!(matches!(err, CryptoError::SyncFailed(_)));
    }

    #[tokio::test]
    async fn fetch_drops_revoked_devices_in_one_batch() {
        let directory = Arc::new(FakeDirectory::default());
        let alice = UserId::new();
        let bob = UserId::new();
        let active = KeyPair::generate().public().to_base64();
        let revoked = KeyPair::generate().public().to_base64();
        directory.devices.lock().unwrap().extend([
            row_for(alice, active.clone(), false),
            row_for(bob, revoked, true),
            row_for(bob, KeyPair::generate().public().to_base64(), false),
        ]);

        let manager = manager_with(Arc::new(MemoryStore::new()), directory.clone());
        let devices = manager
            .fetch_recipient_directory(&[alice, bob, alice])
            .await
            .unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(*directory.fetch_calls.lock().unwrap(), 1);
        assert!(devices.iter().any(|d| d.user_id == alice && d.public_key.to_base64() == active));
    }

    #[tokio::test]
    async fn fetch_with_malformed_key_is_invalid_recipient() {
        let directory = Arc::new(FakeDirectory::default());
        let user = UserId::new();
        directory
            .devices
            .lock()
            .unwrap()
            .push(row_for(user, "c2hvcnQ=".into(), false));

        let manager = manager_with(Arc::new(MemoryStore::new()), directory);
        let err = manager.fetch_recipient_directory(&[user]).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn fetch_timeout_is_invalid_recipient_not_empty() {
        let manager = manager_with(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeDirectory::failing(BackendError::Timeout)),
        );
        let err = manager
            .fetch_recipient_directory(&[UserId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn legacy_identity_is_published_and_fetched() {
        let directory = Arc::new(FakeDirectory::default());
        let manager = manager_with(Arc::new(MemoryStore::new()), directory);
        let user = UserId::new();

        let legacy = manager.get_or_create_legacy_identity(user).await.unwrap();
        let device = manager.get_or_create_identity(user).await.unwrap();
        assert_ne!(legacy.public_key(), device.public_key());

        manager.publish_legacy_key(&legacy).await.unwrap();
        assert_eq!(manager.fetch_legacy_key(user).await.unwrap(), *legacy.public_key());

        let err = manager.fetch_legacy_key(UserId::new()).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn loading_legacy_identity_never_creates_one() {
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(store.clone(), Arc::new(FakeDirectory::default()));
        let user = UserId::new();

        assert!(manager.load_legacy_identity(user).await.unwrap().is_none());
        assert!(store.is_empty());

        let created = manager.get_or_create_legacy_identity(user).await.unwrap();
        let reloaded = manager_with(store, Arc::new(FakeDirectory::default()))
            .load_legacy_identity(user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.public_key(), created.public_key());
    }

    #[test]
    fn debug_output_does_not_leak_secret() {
        let identity = DeviceIdentity::new(UserId::new(), DeviceId::new(), KeyPair::generate());
        let secret = identity.secret_key().to_base64();
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains(secret.as_str()));
        assert!(rendered.contains(&identity.public_key().to_base64()));
    }
}

//! Multi-device roundtrip through the public API: identities created and
//! synced through the directory, envelopes sealed for every device, trust
//! pins checked on the way.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rendezvous_crypto::directory::DeviceDirectory;
use rendezvous_crypto::envelope::{decrypt_envelope_for_device, encrypt_envelope, EncryptedMessageEnvelope};
use rendezvous_crypto::error::CryptoError;
use rendezvous_crypto::identity::{IdentityCache, IdentityManager};
use rendezvous_crypto::pinning::{PeerId, PinCache, TrustStore};
use rendezvous_crypto::storage::MemoryStore;
use rendezvous_shared::api::device::{DeviceDirectoryRow, LegacyKeyRow};
use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::UserId;

#[derive(Default)]
struct SharedDirectory {
    devices: Mutex<Vec<DeviceDirectoryRow>>,
    legacy: Mutex<Vec<LegacyKeyRow>>,
}

#[async_trait]
impl DeviceDirectory for SharedDirectory {
    async fn upsert_device(&self, row: &DeviceDirectoryRow) -> Result<(), BackendError> {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|r| !(r.user_id == row.user_id && r.device_id == row.device_id));
        devices.push(row.clone());
        Ok(())
    }

    async fn fetch_devices(&self, user_ids: &[UserId]) -> Result<Vec<DeviceDirectoryRow>, BackendError> {
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
        self.legacy.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn fetch_legacy_keys(&self, user_ids: &[UserId]) -> Result<Vec<LegacyKeyRow>, BackendError> {
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

/// One installation: its own secure store and caches, a shared directory.
fn installation(directory: &Arc<SharedDirectory>) -> (IdentityManager, TrustStore) {
    let store = Arc::new(MemoryStore::new());
    let manager = IdentityManager::new(
        store.clone(),
        directory.clone(),
        Arc::new(IdentityCache::new()),
    );
    let trust = TrustStore::new(store, Arc::new(PinCache::new()));
    (manager, trust)
}

#[tokio::test]
async fn sender_and_every_recipient_device_read_the_message() {
    let directory = Arc::new(SharedDirectory::default());
    let alice = UserId::new();
    let bob = UserId::new();

    let (a1_manager, a1_trust) = installation(&directory);
    let (b1_manager, _) = installation(&directory);
    let (b2_manager, _) = installation(&directory);

    let a1 = a1_manager.get_or_create_identity(alice).await.unwrap();
    let b1 = b1_manager.get_or_create_identity(bob).await.unwrap();
    let b2 = b2_manager.get_or_create_identity(bob).await.unwrap();
    for (manager, identity) in [(&a1_manager, &a1), (&b1_manager, &b1), (&b2_manager, &b2)] {
        manager.sync_to_directory(identity).await.unwrap();
    }

    let recipients = a1_manager.fetch_recipient_directory(&[bob]).await.unwrap();
    assert_eq!(recipients.len(), 2);

    let observed: Vec<_> = recipients
        .iter()
        .map(|d| (PeerId::Device(d.user_id, d.device_id), d.public_key))
        .collect();
    let report = a1_trust.pin_and_check(alice, &observed).await.unwrap();
    assert_eq!(report.newly_pinned.len(), 2);

    let envelope = encrypt_envelope("hello", &a1, &recipients, true).unwrap();
    assert_eq!(envelope.key_boxes.len(), 3);

    // Stored and fetched back through the wire form.
    let stored = EncryptedMessageEnvelope::from_payload(&envelope.to_payload()).unwrap();

    let readers = [a1.clone(), b1.clone(), b2.clone()];
    let results = futures::future::join_all(readers.iter().map(|reader| {
        let stored = &stored;
        async move {
            let key_box = stored.find_key_box(reader.user_id, reader.device_id)?;
            decrypt_envelope_for_device(stored, key_box, reader.secret_key())
        }
    }))
    .await;
    for result in results {
        assert_eq!(result.unwrap(), "hello");
    }
}

#[tokio::test]
async fn device_enrolled_later_cannot_read_old_messages() {
    let directory = Arc::new(SharedDirectory::default());
    let alice = UserId::new();
    let bob = UserId::new();

    let (a1_manager, _) = installation(&directory);
    let (b1_manager, _) = installation(&directory);
    let a1 = a1_manager.get_or_create_identity(alice).await.unwrap();
    let b1 = b1_manager.get_or_create_identity(bob).await.unwrap();
    b1_manager.sync_to_directory(&b1).await.unwrap();

    let recipients = a1_manager.fetch_recipient_directory(&[bob]).await.unwrap();
    let envelope = encrypt_envelope("before b3", &a1, &recipients, false).unwrap();

    let (b3_manager, _) = installation(&directory);
    let b3 = b3_manager.get_or_create_identity(bob).await.unwrap();
    b3_manager.sync_to_directory(&b3).await.unwrap();

    let err = envelope.find_key_box(bob, b3.device_id).unwrap_err();
    assert!(matches!(err, CryptoError::MissingKeyBox { .. }));

    let recipients = a1_manager.fetch_recipient_directory(&[bob]).await.unwrap();
    let later = encrypt_envelope("after b3", &a1, &recipients, false).unwrap();
    let key_box = later.find_key_box(bob, b3.device_id).unwrap();
    assert_eq!(
        decrypt_envelope_for_device(&later, key_box, b3.secret_key()).unwrap(),
        "after b3"
    );
}

#[tokio::test]
async fn reinstalled_device_key_is_flagged_as_changed() {
    let directory = Arc::new(SharedDirectory::default());
    let alice = UserId::new();
    let bob = UserId::new();

    let (a1_manager, a1_trust) = installation(&directory);
    let (b1_manager, _) = installation(&directory);
    a1_manager.get_or_create_identity(alice).await.unwrap();
    let b1 = b1_manager.get_or_create_identity(bob).await.unwrap();
    b1_manager.sync_to_directory(&b1).await.unwrap();

    let first = a1_manager.fetch_recipient_directory(&[bob]).await.unwrap();
    let peer = PeerId::Device(bob, b1.device_id);
    a1_trust
        .pin_and_check(alice, &[(peer, first[0].public_key)])
        .await
        .unwrap();

    // Same device id republished with a different key.
    let mut row = directory.devices.lock().unwrap()[0].clone();
    row.public_key = rendezvous_crypto::keys::KeyPair::generate().public().to_base64();
    directory.upsert_device(&row).await.unwrap();

    let second = a1_manager.fetch_recipient_directory(&[bob]).await.unwrap();
    let report = a1_trust
        .pin_and_check(alice, &[(peer, second[0].public_key)])
        .await
        .unwrap();
    assert_eq!(report.changed, vec![peer]);
}

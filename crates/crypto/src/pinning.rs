//! Trust-on-first-use fingerprint pinning.
//!
//! For every owner the store keeps, per peer, the fingerprint of the first
//! public key observed. Later observations are compared against it: a new
//! peer is pinned, a differing key is reported as changed and the stored pin
//! is left as it was. Re-pinning a changed key only happens through
//! [`TrustStore::accept_changed_key`].
//!
//! Peers are users under the single-key protocol and (user, device) pairs
//! under the multi-device protocol.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use rendezvous_shared::ids::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CryptoError;
use crate::fingerprint::Fingerprint;
use crate::keys::PublicKey;
use crate::storage::{self, SecureStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerId {
    User(UserId),
    Device(UserId, DeviceId),
}

impl PeerId {
    pub fn user_id(&self) -> UserId {
        match self {
            PeerId::User(user_id) | PeerId::Device(user_id, _) => *user_id,
        }
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerId::User(user_id) => write!(f, "user:{user_id}"),
            PeerId::Device(user_id, device_id) => write!(f, "device:{user_id}:{device_id}"),
        }
    }
}

impl FromStr for PeerId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CryptoError::StorageError(format!("malformed peer id: {s}"));
        let mut parts = s.split(':');
        let peer = match (parts.next(), parts.next(), parts.next()) {
            (Some("user"), Some(user), None) => PeerId::User(user.parse().map_err(|_| malformed())?),
            (Some("device"), Some(user), Some(device)) => PeerId::Device(
                user.parse().map_err(|_| malformed())?,
                device.parse().map_err(|_| malformed())?,
            ),
            _ => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(peer)
    }
}

/// Outcome of one [`TrustStore::pin_and_check`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinReport {
    /// Peers whose observed key differs from the pinned one.
    pub changed: Vec<PeerId>,
    /// Peers seen for the first time and pinned by this call.
    pub newly_pinned: Vec<PeerId>,
}

impl PinReport {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PinRecord {
    fingerprint: String,
    pinned_at: i64,
}

type PinSet = BTreeMap<String, PinRecord>;
type Slot = Arc<Mutex<Option<PinSet>>>;

/// Session-scoped cache of loaded pin sets, one async slot per owner.
#[derive(Default)]
pub struct PinCache {
    owners: DashMap<UserId, Slot>,
}

impl PinCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, owner: UserId) -> Slot {
        self.owners.entry(owner).or_default().clone()
    }

    pub fn evict(&self, owner: &UserId) {
        self.owners.remove(owner);
    }
}

pub struct TrustStore {
    store: Arc<dyn SecureStore>,
    cache: Arc<PinCache>,
}

impl TrustStore {
    pub fn new(store: Arc<dyn SecureStore>, cache: Arc<PinCache>) -> Self {
        Self { store, cache }
    }

    /// Compare `observed` keys against `owner`'s pins, pinning unseen peers.
    ///
    /// The whole read-modify-write runs under the owner's lock.
    pub async fn pin_and_check(
        &self,
        owner: UserId,
        observed: &[(PeerId, PublicKey)],
    ) -> Result<PinReport, CryptoError> {
        let slot = self.cache.slot(owner);
        let mut guard = slot.lock().await;
        let pins = self.loaded(owner, &mut guard).await?;

        let mut report = PinReport::default();
        let mut updated = pins.clone();
        let now = chrono::Utc::now().timestamp();

        for (peer, key) in observed {
            let observed_fp = Fingerprint::of(key);
            let peer_key = peer.to_string();
            match updated.get(&peer_key) {
                Some(record) => {
                    let pinned = Fingerprint::from_hex(&record.fingerprint)?;
                    if !pinned.matches(&observed_fp) && !report.changed.contains(peer) {
                        report.changed.push(*peer);
                    }
                }
                None => {
                    updated.insert(
                        peer_key,
                        PinRecord {
                            fingerprint: observed_fp.to_hex(),
                            pinned_at: now,
                        },
                    );
                    report.newly_pinned.push(*peer);
                }
            }
        }

        if !report.newly_pinned.is_empty() {
            self.persist(owner, &updated).await?;
            *guard = Some(updated);
        }

        if report.has_changes() {
            tracing::warn!(%owner, changed = report.changed.len(), "pinned key mismatch");
        }
        if !report.newly_pinned.is_empty() {
            tracing::debug!(%owner, pinned = report.newly_pinned.len(), "pinned new peer keys");
        }
        Ok(report)
    }

    /// Replace the pin for `peer` with `key` after the owner chose to trust
    /// it.
    pub async fn accept_changed_key(
        &self,
        owner: UserId,
        peer: PeerId,
        key: &PublicKey,
    ) -> Result<(), CryptoError> {
        let slot = self.cache.slot(owner);
        let mut guard = slot.lock().await;
        let mut updated = self.loaded(owner, &mut guard).await?.clone();
        updated.insert(
            peer.to_string(),
            PinRecord {
                fingerprint: Fingerprint::of(key).to_hex(),
                pinned_at: chrono::Utc::now().timestamp(),
            },
        );
        self.persist(owner, &updated).await?;
        *guard = Some(updated);
        tracing::info!(%owner, %peer, "accepted changed peer key");
        Ok(())
    }

    /// Remove the pin for `peer`. Returns whether one existed.
    pub async fn forget_peer(&self, owner: UserId, peer: PeerId) -> Result<bool, CryptoError> {
        let slot = self.cache.slot(owner);
        let mut guard = slot.lock().await;
        let mut updated = self.loaded(owner, &mut guard).await?.clone();
        if updated.remove(&peer.to_string()).is_none() {
            return Ok(false);
        }
        self.persist(owner, &updated).await?;
        *guard = Some(updated);
        Ok(true)
    }

    pub async fn pinned_fingerprint(
        &self,
        owner: UserId,
        peer: PeerId,
    ) -> Result<Option<Fingerprint>, CryptoError> {
        let slot = self.cache.slot(owner);
        let mut guard = slot.lock().await;
        let pins = self.loaded(owner, &mut guard).await?;
        pins.get(&peer.to_string())
            .map(|record| Fingerprint::from_hex(&record.fingerprint))
            .transpose()
    }

    /// Every pinned peer of `owner`.
    pub async fn pinned_peers(&self, owner: UserId) -> Result<Vec<PeerId>, CryptoError> {
        let slot = self.cache.slot(owner);
        let mut guard = slot.lock().await;
        let pins = self.loaded(owner, &mut guard).await?;
        pins.keys().map(|k| k.parse()).collect()
    }

    async fn loaded<'a>(
        &self,
        owner: UserId,
        slot: &'a mut Option<PinSet>,
    ) -> Result<&'a PinSet, CryptoError> {
        if slot.is_none() {
            let pins = match self
                .store
                .get(&storage::pinned_fingerprints_key(&owner))
                .await?
            {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => PinSet::new(),
            };
            *slot = Some(pins);
        }
        Ok(slot.get_or_insert_with(PinSet::new))
    }

    async fn persist(&self, owner: UserId, pins: &PinSet) -> Result<(), CryptoError> {
        let encoded = serde_json::to_vec(pins)?;
        self.store
            .set(&storage::pinned_fingerprints_key(&owner), &encoded)
            .await
    }
}

use crate::ids::{DeviceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the backend device directory.
///
/// `public_key` is the standard-base64 X25519 public key. `revoked` is set
/// server-side only; clients read it but never produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDirectoryRow {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub public_key: String,
    pub key_version: u32,
    #[serde(default)]
    pub revoked: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// Per-account public key used by the single-key protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyKeyRow {
    pub user_id: UserId,
    pub public_key: String,
}

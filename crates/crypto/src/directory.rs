//! Backend device directory port.

use async_trait::async_trait;
use rendezvous_shared::api::device::{DeviceDirectoryRow, LegacyKeyRow};
use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::UserId;

/// Public key directory hosted by the backend.
///
/// Implementations must answer `fetch_*` for all requested users in one
/// round-trip; callers never issue per-recipient queries.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Insert or replace the row keyed by (user id, device id).
    async fn upsert_device(&self, row: &DeviceDirectoryRow) -> Result<(), BackendError>;

    /// All rows, revoked included, for the given users.
    async fn fetch_devices(&self, user_ids: &[UserId])
        -> Result<Vec<DeviceDirectoryRow>, BackendError>;

    async fn publish_legacy_key(&self, row: &LegacyKeyRow) -> Result<(), BackendError>;

    async fn fetch_legacy_keys(&self, user_ids: &[UserId]) -> Result<Vec<LegacyKeyRow>, BackendError>;
}

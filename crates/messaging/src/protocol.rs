//! Session-level choice between the multi-device and legacy protocols.

use rendezvous_crypto::error::CryptoError;
use rendezvous_crypto::identity::{DeviceIdentity, IdentityManager};
use rendezvous_crypto::version::ProtocolVersion;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Not checked yet this session.
    Unknown,
    /// The device directory accepted this device; writes use v2.
    V2Available,
    /// The multi-device tables are missing; writes use v1 until restart.
    V1Fallback,
}

impl ProtocolState {
    pub fn write_version(&self) -> Option<ProtocolVersion> {
        match self {
            ProtocolState::Unknown => None,
            ProtocolState::V2Available => Some(ProtocolVersion::V2),
            ProtocolState::V1Fallback => Some(ProtocolVersion::V1),
        }
    }
}

pub struct ProtocolSelector {
    state: Mutex<ProtocolState>,
    force_legacy: bool,
}

impl ProtocolSelector {
    pub fn new(force_legacy: bool) -> Self {
        Self {
            state: Mutex::new(ProtocolState::Unknown),
            force_legacy,
        }
    }

    pub async fn state(&self) -> ProtocolState {
        *self.state.lock().await
    }

    /// The protocol to write with, probing the directory on first use.
    ///
    /// The check is the device's directory sync. A missing schema settles
    /// the session on v1; any other sync failure is returned and the state
    /// stays `Unknown` so the next send checks again.
    pub async fn resolve(
        &self,
        identities: &IdentityManager,
        identity: &DeviceIdentity,
    ) -> Result<ProtocolVersion, CryptoError> {
        let mut state = self.state.lock().await;
        if let Some(version) = state.write_version() {
            return Ok(version);
        }

        if self.force_legacy {
            *state = ProtocolState::V1Fallback;
            tracing::info!("legacy protocol forced by configuration");
            return Ok(ProtocolVersion::V1);
        }

        match identities.sync_to_directory(identity).await {
            Ok(()) => {
                *state = ProtocolState::V2Available;
                tracing::info!(device_id = %identity.device_id, "multi-device protocol available");
                Ok(ProtocolVersion::V2)
            }
            Err(CryptoError::SchemaUnavailable(detail)) => {
                *state = ProtocolState::V1Fallback;
                tracing::warn!(%detail, "device directory missing, falling back to legacy protocol");
                Ok(ProtocolVersion::V1)
            }
            Err(err) => Err(err),
        }
    }

    /// A v2 write found the schema missing: stay on v1 for the rest of the
    /// session.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if *state != ProtocolState::V1Fallback {
            tracing::warn!(previous = ?*state, "multi-device schema disappeared, falling back to legacy protocol");
        }
        *state = ProtocolState::V1Fallback;
    }
}

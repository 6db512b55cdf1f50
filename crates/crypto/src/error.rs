//! Error types for the rendezvous-crypto crate.

use rendezvous_shared::error::BackendError;
use rendezvous_shared::ids::{DeviceId, UserId};
use thiserror::Error;

use crate::pinning::PeerId;

/// Errors that can occur during cryptographic and key-management operations.
///
/// The first seven variants are the outcome taxonomy the orchestrator turns
/// into user-visible behavior; the rest are local infrastructure failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The backend tables for the multi-device protocol are not provisioned.
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// Empty recipient set, a malformed recipient key, or an incomplete
    /// device directory.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Empty plaintext, malformed key box fields, or a malformed media
    /// envelope.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The envelope holds no key material for the requesting device.
    #[error("no key box for device {device_id} of user {user_id}")]
    MissingKeyBox { user_id: UserId, device_id: DeviceId },

    /// Authentication failed while unwrapping the content key or decrypting
    /// the body.
    #[error("decryption failed")]
    DecryptFailed,

    /// A pinned fingerprint no longer matches the observed key.
    #[error("key changed for {} peer(s)", peers.len())]
    KeyChanged { peers: Vec<PeerId> },

    /// Transient failure writing to the backend; local state is intact.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// Local key material is malformed (wrong length, low-order point, ...).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Secure local storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// OS keychain operation failed.
    #[error("keychain error: {0}")]
    KeychainError(String),

    /// OS keychain is not available on this platform.
    #[error("keychain unavailable")]
    KeychainUnavailable,

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("io error: {0}")]
    Io(String),
}

/// Stable, loggable classification of a [`CryptoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SchemaUnavailable,
    InvalidRecipient,
    InvalidPayload,
    MissingKeyBox,
    DecryptFailed,
    KeyChanged,
    SyncFailed,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaUnavailable => "schema_unavailable",
            ErrorKind::InvalidRecipient => "invalid_recipient",
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::MissingKeyBox => "missing_key_box",
            ErrorKind::DecryptFailed => "decrypt_failed",
            ErrorKind::KeyChanged => "key_changed",
            ErrorKind::SyncFailed => "sync_failed",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::SchemaUnavailable(_) => ErrorKind::SchemaUnavailable,
            CryptoError::InvalidRecipient(_) => ErrorKind::InvalidRecipient,
            CryptoError::InvalidPayload(_) | CryptoError::SerializationError(_) => {
                ErrorKind::InvalidPayload
            }
            CryptoError::MissingKeyBox { .. } => ErrorKind::MissingKeyBox,
            CryptoError::DecryptFailed => ErrorKind::DecryptFailed,
            CryptoError::KeyChanged { .. } => ErrorKind::KeyChanged,
            CryptoError::SyncFailed(_) => ErrorKind::SyncFailed,
            CryptoError::InvalidKey(_)
            | CryptoError::StorageError(_)
            | CryptoError::KeychainError(_)
            | CryptoError::KeychainUnavailable
            | CryptoError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Schema and sync failures leave local state untouched and may be
    /// retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CryptoError::SchemaUnavailable(_) | CryptoError::SyncFailed(_)
        )
    }

    /// Map a failed backend write (directory upsert, key publish).
    pub fn from_backend_write(err: BackendError) -> Self {
        match err {
            BackendError::SchemaUnavailable(detail) => CryptoError::SchemaUnavailable(detail),
            other => CryptoError::SyncFailed(other.to_string()),
        }
    }

    /// Map a failed backend read (recipient keys, members, history). Anything
    /// other than a missing schema means the data needed is incomplete.
    pub fn from_backend_read(err: BackendError) -> Self {
        match err {
            BackendError::SchemaUnavailable(detail) => CryptoError::SchemaUnavailable(detail),
            BackendError::Timeout => {
                CryptoError::InvalidRecipient("backend read timed out".into())
            }
            other => CryptoError::InvalidRecipient(format!("backend read failed: {other}")),
        }
    }
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CryptoError {
    fn from(err: std::io::Error) -> Self {
        CryptoError::Io(err.to_string())
    }
}

impl From<keyring::Error> for CryptoError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                CryptoError::KeychainUnavailable
            }
            other => CryptoError::KeychainError(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for CryptoError {
    fn from(err: tokio::task::JoinError) -> Self {
        CryptoError::StorageError(format!("storage task failed: {err}"))
    }
}

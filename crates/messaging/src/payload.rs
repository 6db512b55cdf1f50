//! Plaintext layout of media messages.
//!
//! A media message body is JSON: an optional caption and one descriptor per
//! attachment. Descriptors are the only place attachment key material is
//! written, so it is protected by the message encryption.

use rendezvous_crypto::error::CryptoError;
use rendezvous_crypto::media::{EncodedMediaKey, MediaKeyMaterial};
use rendezvous_shared::api::attachment::{AttachmentMetadata, MediaKind};
use rendezvous_shared::ids::AttachmentId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub attachment_id: AttachmentId,
    pub media_kind: MediaKind,
    pub storage_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub content_hash: String,
    #[serde(flatten)]
    pub key: EncodedMediaKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<ThumbnailDescriptor>,
}

/// Encrypted preview image of an attachment, sealed under its own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailDescriptor {
    pub storage_path: String,
    #[serde(flatten)]
    pub key: EncodedMediaKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
}

impl MediaPayload {
    pub fn to_plaintext(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_plaintext(plaintext: &str) -> Result<Self, CryptoError> {
        let payload: MediaPayload = serde_json::from_str(plaintext)
            .map_err(|e| CryptoError::InvalidPayload(format!("malformed media payload: {e}")))?;
        if payload.attachments.is_empty() {
            return Err(CryptoError::InvalidPayload("media payload has no attachments".into()));
        }
        Ok(payload)
    }
}

/// An attachment as presented to the reader: stored metadata merged with
/// the key material from the decrypted message.
#[derive(Debug, Clone)]
pub struct DecryptedAttachment {
    pub id: AttachmentId,
    pub media_kind: MediaKind,
    pub storage_path: String,
    pub size_bytes: u64,
    pub duration_ms: Option<u64>,
    pub content_hash: String,
    pub thumbnail_path: Option<String>,
    pub key_material: MediaKeyMaterial,
    pub thumbnail_key: Option<MediaKeyMaterial>,
}

impl DecryptedAttachment {
    /// Location data comes from the stored row when present. The content
    /// hash always comes from the encrypted descriptor.
    pub fn merge(
        descriptor: &AttachmentDescriptor,
        stored: Option<&AttachmentMetadata>,
    ) -> Result<Self, CryptoError> {
        let key_material = MediaKeyMaterial::decode(&descriptor.key)?;
        let thumbnail_key = descriptor
            .thumbnail
            .as_ref()
            .map(|thumbnail| MediaKeyMaterial::decode(&thumbnail.key))
            .transpose()?;
        let thumbnail_fallback = descriptor.thumbnail.as_ref().map(|t| t.storage_path.clone());
        Ok(match stored {
            Some(row) => Self {
                id: descriptor.attachment_id,
                media_kind: row.media_kind,
                storage_path: row.storage_path.clone(),
                size_bytes: row.size_bytes,
                duration_ms: row.duration_ms,
                content_hash: descriptor.content_hash.clone(),
                thumbnail_path: row.thumbnail_path.clone().or(thumbnail_fallback),
                key_material,
                thumbnail_key,
            },
            None => Self {
                id: descriptor.attachment_id,
                media_kind: descriptor.media_kind,
                storage_path: descriptor.storage_path.clone(),
                size_bytes: descriptor.size_bytes,
                duration_ms: descriptor.duration_ms,
                content_hash: descriptor.content_hash.clone(),
                thumbnail_path: thumbnail_fallback,
                key_material,
                thumbnail_key,
            },
        })
    }
}

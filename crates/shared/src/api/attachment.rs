use crate::ids::{AttachmentId, MessageId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Attachment metadata persisted next to a message.
///
/// Never carries the media key or nonce; those travel only inside the
/// encrypted message plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub id: AttachmentId,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    pub storage_path: String,
    pub size_bytes: u64,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub content_hash: String,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
}

use crate::api::attachment::AttachmentMetadata;
use crate::constants::{PROTOCOL_V1, PROTOCOL_V2};
use crate::ids::{ClientMessageId, ConversationId, DeviceId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the decrypted plaintext of a message holds.
///
/// `Text` plaintext is the message text itself; media kinds carry a JSON
/// payload with caption and attachment descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
}

impl MessageKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

/// Wrapped content key for one recipient device. Binary fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBoxPayload {
    pub recipient_user_id: UserId,
    pub recipient_device_id: DeviceId,
    pub wrapped_key: String,
    pub wrap_nonce: String,
    pub sender_public_key: String,
    pub sender_key_version: u32,
}

/// Multi-device envelope fields as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_nonce: Option<String>,
    pub key_boxes: Vec<KeyBoxPayload>,
}

/// Single-key protocol fields: one sealed copy per participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPayload {
    pub ciphertext_for_recipient: String,
    pub nonce_for_recipient: String,
    pub ciphertext_for_sender: String,
    pub nonce_for_sender: String,
}

/// Encrypted body of a stored message, tagged by protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum EncryptedBody {
    #[serde(rename = "v1")]
    Legacy(LegacyPayload),
    #[serde(rename = "v2")]
    Envelope(EnvelopePayload),
}

impl EncryptedBody {
    pub fn version_tag(&self) -> &'static str {
        match self {
            EncryptedBody::Legacy(_) => PROTOCOL_V1,
            EncryptedBody::Envelope(_) => PROTOCOL_V2,
        }
    }
}

/// Request to persist a multi-device envelope message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEnvelopeRequest {
    pub conversation_id: ConversationId,
    pub sender_device_id: DeviceId,
    pub client_message_id: ClientMessageId,
    pub kind: MessageKind,
    pub version: String,
    #[serde(flatten)]
    pub envelope: EnvelopePayload,
    /// Stored in the same write as the message; the backend fills in
    /// `message_id`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentMetadata>,
}

/// Request to persist a single-key protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLegacyRequest {
    pub conversation_id: ConversationId,
    pub client_message_id: ClientMessageId,
    pub kind: MessageKind,
    pub version: String,
    #[serde(flatten)]
    pub legacy: LegacyPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentMetadata>,
}

/// A stored message as returned by fetch/subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_device_id: Option<DeviceId>,
    pub kind: MessageKind,
    #[serde(flatten)]
    pub body: EncryptedBody,
    pub created_at: DateTime<Utc>,
}

//! Multi-device message envelope (protocol v2).
//!
//! The body is sealed once under a fresh random content key. The content
//! key is then wrapped for every recipient device with the public-key box,
//! each box under its own nonce. The sender's own device always receives a
//! box so the sender can read its own history.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rendezvous_shared::api::message::{EnvelopePayload, KeyBoxPayload};
use rendezvous_shared::constants::{MAX_MESSAGE_SIZE_BYTES, PREVIEW_MAX_CHARS};
use rendezvous_shared::ids::{DeviceId, UserId};
use zeroize::Zeroizing;

use crate::cipher::{self, Nonce, Sealed, SymmetricKey};
use crate::error::CryptoError;
use crate::identity::{DeviceIdentity, RecipientDevice};
use crate::keys::{PublicKey, SecretKey};
use crate::version::ProtocolVersion;

const BODY_AAD: &[u8] = b"rendezvous/v2/body";
const PREVIEW_AAD: &[u8] = b"rendezvous/v2/preview";

/// The content key wrapped for one recipient device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBox {
    pub recipient_user_id: UserId,
    pub recipient_device_id: DeviceId,
    pub wrapped_key: Vec<u8>,
    pub wrap_nonce: Nonce,
    pub sender_public_key: PublicKey,
    pub sender_key_version: u32,
}

impl KeyBox {
    pub fn to_payload(&self) -> KeyBoxPayload {
        KeyBoxPayload {
            recipient_user_id: self.recipient_user_id,
            recipient_device_id: self.recipient_device_id,
            wrapped_key: STANDARD.encode(&self.wrapped_key),
            wrap_nonce: self.wrap_nonce.to_base64(),
            sender_public_key: self.sender_public_key.to_base64(),
            sender_key_version: self.sender_key_version,
        }
    }

    pub fn from_payload(payload: &KeyBoxPayload) -> Result<Self, CryptoError> {
        let wrapped_key = STANDARD
            .decode(&payload.wrapped_key)
            .map_err(|_| CryptoError::InvalidPayload("wrapped key is not base64".into()))?;
        let sender_public_key = PublicKey::from_base64(&payload.sender_public_key)
            .map_err(|e| CryptoError::InvalidPayload(format!("sender key: {e}")))?;
        Ok(Self {
            recipient_user_id: payload.recipient_user_id,
            recipient_device_id: payload.recipient_device_id,
            wrapped_key,
            wrap_nonce: Nonce::from_base64(&payload.wrap_nonce)?,
            sender_public_key,
            sender_key_version: payload.sender_key_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessageEnvelope {
    pub ciphertext: Vec<u8>,
    pub nonce: Nonce,
    pub version: ProtocolVersion,
    pub preview: Option<Sealed>,
    pub key_boxes: Vec<KeyBox>,
}

impl EncryptedMessageEnvelope {
    /// The key box addressed to (`user_id`, `device_id`).
    pub fn find_key_box(&self, user_id: UserId, device_id: DeviceId) -> Result<&KeyBox, CryptoError> {
        self.key_boxes
            .iter()
            .find(|b| b.recipient_user_id == user_id && b.recipient_device_id == device_id)
            .ok_or(CryptoError::MissingKeyBox { user_id, device_id })
    }

    pub fn to_payload(&self) -> EnvelopePayload {
        EnvelopePayload {
            ciphertext: STANDARD.encode(&self.ciphertext),
            nonce: self.nonce.to_base64(),
            preview_ciphertext: self.preview.as_ref().map(|p| STANDARD.encode(&p.ciphertext)),
            preview_nonce: self.preview.as_ref().map(|p| p.nonce.to_base64()),
            key_boxes: self.key_boxes.iter().map(KeyBox::to_payload).collect(),
        }
    }

    pub fn from_payload(payload: &EnvelopePayload) -> Result<Self, CryptoError> {
        let ciphertext = STANDARD
            .decode(&payload.ciphertext)
            .map_err(|_| CryptoError::InvalidPayload("ciphertext is not base64".into()))?;
        let nonce = Nonce::from_base64(&payload.nonce)?;

        let preview = match (&payload.preview_ciphertext, &payload.preview_nonce) {
            (Some(ct), Some(n)) => Some(Sealed {
                ciphertext: STANDARD.decode(ct).map_err(|_| {
                    CryptoError::InvalidPayload("preview ciphertext is not base64".into())
                })?,
                nonce: Nonce::from_base64(n)?,
            }),
            (None, None) => None,
            _ => {
                return Err(CryptoError::InvalidPayload(
                    "preview ciphertext and nonce must be present together".into(),
                ))
            }
        };

        let key_boxes = payload
            .key_boxes
            .iter()
            .map(KeyBox::from_payload)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            ciphertext,
            nonce,
            version: ProtocolVersion::V2,
            preview,
            key_boxes,
        })
    }
}

/// Encrypt `plaintext` for every device in `recipients` plus the sender's
/// own device, with the default preview length.
pub fn encrypt_envelope(
    plaintext: &str,
    sender: &DeviceIdentity,
    recipients: &[RecipientDevice],
    include_preview: bool,
) -> Result<EncryptedMessageEnvelope, CryptoError> {
    let preview_chars = include_preview.then_some(PREVIEW_MAX_CHARS);
    encrypt_envelope_with_preview(plaintext, sender, recipients, preview_chars)
}

/// Like [`encrypt_envelope`], with the preview truncated to `preview_chars`
/// characters when set.
pub fn encrypt_envelope_with_preview(
    plaintext: &str,
    sender: &DeviceIdentity,
    recipients: &[RecipientDevice],
    preview_chars: Option<usize>,
) -> Result<EncryptedMessageEnvelope, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidPayload("plaintext is empty".into()));
    }
    if plaintext.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(CryptoError::InvalidPayload(format!(
            "plaintext exceeds {MAX_MESSAGE_SIZE_BYTES} bytes"
        )));
    }

    let mut devices = dedupe_recipients(recipients)?;
    if devices.is_empty() {
        return Err(CryptoError::InvalidRecipient("no recipient devices".into()));
    }
    devices
        .entry((sender.user_id, sender.device_id))
        .or_insert_with(|| sender.as_recipient());

    let content_key = SymmetricKey::generate();
    let body = cipher::seal(&content_key, plaintext.as_bytes(), BODY_AAD)?;

    let preview = match preview_chars {
        Some(limit) => {
            let text: String = plaintext.chars().take(limit.min(PREVIEW_MAX_CHARS)).collect();
            Some(cipher::seal(&content_key, text.as_bytes(), PREVIEW_AAD)?)
        }
        None => None,
    };

    let sender_public_key = *sender.public_key();
    let key_boxes = devices
        .values()
        .map(|device| {
            let wrapped = cipher::seal_box(
                content_key.as_bytes(),
                sender.secret_key(),
                &device.public_key,
            )
            .map_err(|e| match e {
                CryptoError::InvalidKey(detail) => CryptoError::InvalidRecipient(format!(
                    "device {} of user {}: {detail}",
                    device.device_id, device.user_id
                )),
                other => other,
            })?;
            Ok(KeyBox {
                recipient_user_id: device.user_id,
                recipient_device_id: device.device_id,
                wrapped_key: wrapped.ciphertext,
                wrap_nonce: wrapped.nonce,
                sender_public_key,
                sender_key_version: sender.key_version,
            })
        })
        .collect::<Result<Vec<_>, CryptoError>>()?;

    tracing::debug!(
        sender_device_id = %sender.device_id,
        key_boxes = key_boxes.len(),
        preview = preview.is_some(),
        "sealed message envelope"
    );

    Ok(EncryptedMessageEnvelope {
        ciphertext: body.ciphertext,
        nonce: body.nonce,
        version: ProtocolVersion::V2,
        preview,
        key_boxes,
    })
}

/// Unwrap the content key from `key_box` and decrypt the body.
///
/// Any failure at either stage, including a body that is not UTF-8, is
/// [`CryptoError::DecryptFailed`].
pub fn decrypt_envelope_for_device(
    envelope: &EncryptedMessageEnvelope,
    key_box: &KeyBox,
    recipient_secret: &SecretKey,
) -> Result<String, CryptoError> {
    let content_key = unwrap_content_key(key_box, recipient_secret)?;
    let plaintext = Zeroizing::new(cipher::open(
        &content_key,
        &envelope.ciphertext,
        &envelope.nonce,
        BODY_AAD,
    )?);
    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptFailed)
}

/// Decrypt the list-view preview. `Ok(None)` when the envelope has none.
pub fn decrypt_preview_for_device(
    envelope: &EncryptedMessageEnvelope,
    key_box: &KeyBox,
    recipient_secret: &SecretKey,
) -> Result<Option<String>, CryptoError> {
    let Some(preview) = envelope.preview.as_ref() else {
        return Ok(None);
    };
    let content_key = unwrap_content_key(key_box, recipient_secret)?;
    let plaintext = cipher::open(&content_key, &preview.ciphertext, &preview.nonce, PREVIEW_AAD)?;
    String::from_utf8(plaintext)
        .map(Some)
        .map_err(|_| CryptoError::DecryptFailed)
}

fn unwrap_content_key(
    key_box: &KeyBox,
    recipient_secret: &SecretKey,
) -> Result<SymmetricKey, CryptoError> {
    let raw = Zeroizing::new(cipher::open_box(
        &key_box.wrapped_key,
        &key_box.wrap_nonce,
        &key_box.sender_public_key,
        recipient_secret,
    )?);
    SymmetricKey::from_bytes(&raw).map_err(|_| CryptoError::DecryptFailed)
}

/// Collapse duplicates by (user, device). The same device listed with two
/// different keys is rejected.
fn dedupe_recipients(
    recipients: &[RecipientDevice],
) -> Result<BTreeMap<(UserId, DeviceId), RecipientDevice>, CryptoError> {
    let mut devices = BTreeMap::new();
    for recipient in recipients {
        match devices.get(&(recipient.user_id, recipient.device_id)) {
            Some(existing) if existing != recipient => {
                return Err(CryptoError::InvalidRecipient(format!(
                    "conflicting keys for device {} of user {}",
                    recipient.device_id, recipient.user_id
                )));
            }
            Some(_) => {}
            None => {
                devices.insert((recipient.user_id, recipient.device_id), *recipient);
            }
        }
    }
    Ok(devices)
}

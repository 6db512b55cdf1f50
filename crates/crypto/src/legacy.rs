//! Single-key-per-account protocol (v1).
//!
//! The plaintext is sealed twice with the public-key box: once for the
//! counterpart's account key and once for the sender's own. There is no
//! content key and no notion of devices. Kept for reading pre-migration
//! history and as the write path while the multi-device tables are absent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rendezvous_shared::api::message::LegacyPayload;
use rendezvous_shared::constants::MAX_MESSAGE_SIZE_BYTES;
use zeroize::Zeroizing;

use crate::cipher::{self, Nonce, Sealed};
use crate::error::CryptoError;
use crate::identity::LegacyIdentity;
use crate::keys::PublicKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEncryptedMessage {
    pub for_recipient: Sealed,
    pub for_sender: Sealed,
}

impl LegacyEncryptedMessage {
    pub fn to_payload(&self) -> LegacyPayload {
        LegacyPayload {
            ciphertext_for_recipient: STANDARD.encode(&self.for_recipient.ciphertext),
            nonce_for_recipient: self.for_recipient.nonce.to_base64(),
            ciphertext_for_sender: STANDARD.encode(&self.for_sender.ciphertext),
            nonce_for_sender: self.for_sender.nonce.to_base64(),
        }
    }

    pub fn from_payload(payload: &LegacyPayload) -> Result<Self, CryptoError> {
        Ok(Self {
            for_recipient: decode_sealed(
                &payload.ciphertext_for_recipient,
                &payload.nonce_for_recipient,
            )?,
            for_sender: decode_sealed(&payload.ciphertext_for_sender, &payload.nonce_for_sender)?,
        })
    }
}

fn decode_sealed(ciphertext: &str, nonce: &str) -> Result<Sealed, CryptoError> {
    Ok(Sealed {
        ciphertext: STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::InvalidPayload("legacy ciphertext is not base64".into()))?,
        nonce: Nonce::from_base64(nonce)?,
    })
}

pub fn encrypt_legacy(
    plaintext: &str,
    sender: &LegacyIdentity,
    counterpart: &PublicKey,
) -> Result<LegacyEncryptedMessage, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidPayload("plaintext is empty".into()));
    }
    if plaintext.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(CryptoError::InvalidPayload(format!(
            "plaintext exceeds {MAX_MESSAGE_SIZE_BYTES} bytes"
        )));
    }

    let for_recipient = cipher::seal_box(plaintext.as_bytes(), sender.secret_key(), counterpart)
        .map_err(|e| match e {
            CryptoError::InvalidKey(detail) => CryptoError::InvalidRecipient(detail),
            other => other,
        })?;
    let for_sender =
        cipher::seal_box(plaintext.as_bytes(), sender.secret_key(), sender.public_key())?;

    Ok(LegacyEncryptedMessage {
        for_recipient,
        for_sender,
    })
}

/// Decrypt the copy addressed to `reader`.
///
/// `counterpart` is the other participant's account key. The sender's own
/// copy was sealed to itself, so when `reader_is_sender` it is ignored.
pub fn decrypt_legacy(
    message: &LegacyEncryptedMessage,
    reader: &LegacyIdentity,
    reader_is_sender: bool,
    counterpart: &PublicKey,
) -> Result<String, CryptoError> {
    let plaintext = if reader_is_sender {
        cipher::open_box(
            &message.for_sender.ciphertext,
            &message.for_sender.nonce,
            reader.public_key(),
            reader.secret_key(),
        )?
    } else {
        cipher::open_box(
            &message.for_recipient.ciphertext,
            &message.for_recipient.nonce,
            counterpart,
            reader.secret_key(),
        )?
    };
    let plaintext = Zeroizing::new(plaintext);
    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptFailed)
}

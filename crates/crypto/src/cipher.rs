//! Authenticated encryption primitives.
//!
//! * Symmetric: AES-256-GCM with a random 96-bit nonce per seal.
//! * Public-key box: X25519 static-static agreement, HKDF-SHA256 bound to
//!   both public keys, then AES-256-GCM. Only the holder of either secret
//!   can open a box, and any change to the sender key, nonce or ciphertext
//!   fails authentication.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const BOX_INFO_LABEL: &[u8] = b"rendezvous-box-v1";

/// A 256-bit symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPayload(format!("key must be {KEY_LEN} bytes")))?;
        Ok(Self(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|_| CryptoError::InvalidPayload("key is not base64".into()))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// A 96-bit AES-GCM nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub fn generate() -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        Self(nonce)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let nonce: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPayload(format!("nonce must be {NONCE_LEN} bytes"))
        })?;
        Ok(Self(nonce))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPayload("nonce is not base64".into()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// Ciphertext (with appended tag) and the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Nonce,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptoError> {
    let nonce = Nonce::generate();
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            aes_gcm::Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::InvalidPayload("encryption failed".into()))?;
    Ok(Sealed { ciphertext, nonce })
}

/// Decrypt and authenticate. Every failure is [`CryptoError::DecryptFailed`].
pub fn open(
    key: &SymmetricKey,
    ciphertext: &[u8],
    nonce: &Nonce,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::DecryptFailed);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt(
            aes_gcm::Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Derive the box key shared by `sender` and `recipient`.
///
/// `own_secret` is the caller's half: the sender's secret when sealing, the
/// recipient's when opening. Binding both public keys into the HKDF info
/// makes the key specific to the ordered pair.
fn box_key(
    own_secret: &SecretKey,
    other: &PublicKey,
    sender: &PublicKey,
    recipient: &PublicKey,
) -> Result<SymmetricKey, CryptoError> {
    let shared = own_secret.diffie_hellman(other)?;
    let hk = Hkdf::<Sha256>::new(None, &shared[..]);

    let mut info = Vec::with_capacity(BOX_INFO_LABEL.len() + 64);
    info.extend_from_slice(BOX_INFO_LABEL);
    info.extend_from_slice(sender.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(&info, &mut okm[..])
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    SymmetricKey::from_bytes(&okm[..])
}

/// Seal `plaintext` from `sender_secret` to `recipient`.
pub fn seal_box(
    plaintext: &[u8],
    sender_secret: &SecretKey,
    recipient: &PublicKey,
) -> Result<Sealed, CryptoError> {
    let sender = sender_secret.public_key();
    let key = box_key(sender_secret, recipient, &sender, recipient)?;
    seal(&key, plaintext, b"")
}

/// Open a box sealed by `sender` for the holder of `recipient_secret`.
pub fn open_box(
    ciphertext: &[u8],
    nonce: &Nonce,
    sender: &PublicKey,
    recipient_secret: &SecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let recipient = recipient_secret.public_key();
    let key = box_key(recipient_secret, sender, sender, &recipient)
        .map_err(|_| CryptoError::DecryptFailed)?;
    open(&key, ciphertext, nonce, b"")
}

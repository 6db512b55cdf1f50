//! Media file encryption with AES-256-GCM.
//!
//! Each file is sealed under its own random key and nonce. The resulting
//! [`MediaKeyMaterial`] is never stored next to the ciphertext: it travels
//! inside the encrypted message body, so whoever can read the message can
//! read the attachment and nobody else can.

use std::path::{Path, PathBuf};

use rendezvous_shared::constants::MAX_MEDIA_SIZE_BYTES;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cipher::{self, Nonce, SymmetricKey, TAG_LEN};
use crate::error::CryptoError;

const ENCRYPTED_EXTENSION: &str = "enc";

/// One-time key and nonce of an encrypted media payload.
#[derive(Debug, Clone)]
pub struct MediaKeyMaterial {
    pub key: SymmetricKey,
    pub nonce: Nonce,
}

/// Base64 form of [`MediaKeyMaterial`] for the message plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMediaKey {
    pub key: String,
    pub nonce: String,
}

impl MediaKeyMaterial {
    pub fn generate() -> Self {
        Self {
            key: SymmetricKey::generate(),
            nonce: Nonce::generate(),
        }
    }

    pub fn encode(&self) -> EncodedMediaKey {
        EncodedMediaKey {
            key: self.key.to_base64().to_string(),
            nonce: self.nonce.to_base64(),
        }
    }

    pub fn decode(encoded: &EncodedMediaKey) -> Result<Self, CryptoError> {
        Ok(Self {
            key: SymmetricKey::from_base64(&encoded.key)?,
            nonce: Nonce::from_base64(&encoded.nonce)?,
        })
    }
}

/// An encrypted copy of a media file in the scratch directory.
#[derive(Debug)]
pub struct EncryptedMediaFile {
    pub encrypted_path: PathBuf,
    pub key_material: MediaKeyMaterial,
    pub ciphertext_size: u64,
    pub original_size: u64,
    /// Lowercase hex SHA-256 of the ciphertext.
    pub content_hash: String,
}

/// Size of the ciphertext produced for `plaintext_len` bytes.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    plaintext_len + TAG_LEN as u64
}

pub fn content_hash(ciphertext: &[u8]) -> String {
    hex::encode(Sha256::digest(ciphertext))
}

/// Encrypt an in-memory payload (thumbnails, small media).
pub fn encrypt_bytes(plaintext: &[u8]) -> Result<(Vec<u8>, MediaKeyMaterial), CryptoError> {
    check_media_size(plaintext.len())?;
    let key = SymmetricKey::generate();
    let sealed = cipher::seal(&key, plaintext, b"")?;
    Ok((
        sealed.ciphertext,
        MediaKeyMaterial {
            key,
            nonce: sealed.nonce,
        },
    ))
}

pub fn decrypt_bytes(ciphertext: &[u8], material: &MediaKeyMaterial) -> Result<Vec<u8>, CryptoError> {
    cipher::open(&material.key, ciphertext, &material.nonce, b"")
}

/// Encrypt the file at `path` into `scratch_dir`.
pub async fn encrypt_file(path: &Path, scratch_dir: &Path) -> Result<EncryptedMediaFile, CryptoError> {
    let plaintext = Zeroizing::new(tokio::fs::read(path).await?);
    let original_size = plaintext.len() as u64;
    let (ciphertext, key_material) = encrypt_bytes(&plaintext)?;

    tokio::fs::create_dir_all(scratch_dir).await?;
    let encrypted_path = scratch_dir.join(format!("{}.{ENCRYPTED_EXTENSION}", uuid::Uuid::new_v4()));
    tokio::fs::write(&encrypted_path, &ciphertext).await?;

    let ciphertext_size = ciphertext.len() as u64;
    tracing::debug!(original_size, ciphertext_size, "encrypted media file");

    Ok(EncryptedMediaFile {
        encrypted_path,
        key_material,
        ciphertext_size,
        original_size,
        content_hash: content_hash(&ciphertext),
    })
}

/// Decrypt `encrypted_path` into `output_dir` and return the written path.
///
/// The whole payload is authenticated before anything is written, so a
/// [`CryptoError::DecryptFailed`] leaves `output_dir` untouched.
pub async fn decrypt_file(
    encrypted_path: &Path,
    material: &MediaKeyMaterial,
    output_dir: &Path,
) -> Result<PathBuf, CryptoError> {
    let ciphertext = tokio::fs::read(encrypted_path).await?;
    let plaintext = Zeroizing::new(decrypt_bytes(&ciphertext, material)?);

    let name = match encrypted_path.extension().and_then(|e| e.to_str()) {
        Some(ENCRYPTED_EXTENSION) => encrypted_path.file_stem(),
        _ => encrypted_path.file_name(),
    }
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tokio::fs::create_dir_all(output_dir).await?;
    let output_path = output_dir.join(&name);
    let partial_path = output_dir.join(format!("{name}.part"));

    if let Err(err) = tokio::fs::write(&partial_path, plaintext.as_slice()).await {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return Err(err.into());
    }
    tokio::fs::rename(&partial_path, &output_path).await?;
    Ok(output_path)
}

fn check_media_size(len: usize) -> Result<(), CryptoError> {
    if len == 0 {
        return Err(CryptoError::InvalidPayload("media payload is empty".into()));
    }
    if len > MAX_MEDIA_SIZE_BYTES {
        return Err(CryptoError::InvalidPayload(format!(
            "media payload exceeds {MAX_MEDIA_SIZE_BYTES} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let (ciphertext, material) = encrypt_bytes(b"thumbnail").unwrap();
        assert_eq!(ciphertext.len() as u64, ciphertext_len(9));
        assert_eq!(decrypt_bytes(&ciphertext, &material).unwrap(), b"thumbnail");
    }

    #[test]
    fn wrong_key_fails() {
        let (ciphertext, _) = encrypt_bytes(b"photo").unwrap();
        let other = MediaKeyMaterial::generate();
        let err = decrypt_bytes(&ciphertext, &other).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(encrypt_bytes(b""), Err(CryptoError::InvalidPayload(_))));
    }

    #[test]
    fn key_material_encoding_round_trip() {
        let material = MediaKeyMaterial::generate();
        let decoded = MediaKeyMaterial::decode(&material.encode()).unwrap();
        assert_eq!(decoded.nonce, material.nonce);
        assert_eq!(decoded.key.as_bytes(), material.key.as_bytes());

        let bad = EncodedMediaKey {
            key: "c2hvcnQ=".into(),
            nonce: material.nonce.to_base64(),
        };
        assert!(matches!(
            MediaKeyMaterial::decode(&bad),
            Err(CryptoError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn file_round_trip_through_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        let original: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&source, &original).await.unwrap();

        let scratch = dir.path().join("scratch");
        let encrypted = encrypt_file(&source, &scratch).await.unwrap();
        assert_eq!(encrypted.original_size, 4096);
        assert_eq!(encrypted.ciphertext_size, 4096 + TAG_LEN as u64);
        assert!(encrypted.encrypted_path.starts_with(&scratch));

        let on_disk = tokio::fs::read(&encrypted.encrypted_path).await.unwrap();
        assert_eq!(encrypted.content_hash, content_hash(&on_disk));
        assert_eq!(encrypted.content_hash.len(), 64);

        let out = dir.path().join("out");
        let decrypted_path = decrypt_file(&encrypted.encrypted_path, &encrypted.key_material, &out)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&decrypted_path).await.unwrap(), original);
    }

    #[tokio::test]
    async fn tampered_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.jpg");
        tokio::fs::write(&source, b"jpeg bytes").await.unwrap();
        let encrypted = encrypt_file(&source, dir.path()).await.unwrap();

        let mut bytes = tokio::fs::read(&encrypted.encrypted_path).await.unwrap();
        bytes[0] ^= 0x01;
        tokio::fs::write(&encrypted.encrypted_path, &bytes).await.unwrap();

        let out = dir.path().join("out");
        let err = decrypt_file(&encrypted.encrypted_path, &encrypted.key_material, &out)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::DecryptFailed));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn empty_file_is_invalid_payload() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("empty.jpg");
        tokio::fs::write(&source, b"").await.unwrap();
        let err = encrypt_file(&source, dir.path()).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPayload(_)));
    }
}

//! Public key fingerprints.
//!
//! A fingerprint is the SHA-256 digest of the raw public key bytes. It is
//! what the trust store pins, and its numeric form is what two users compare
//! out of band (`safety_number`).

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;
use crate::keys::PublicKey;

const FINGERPRINT_LEN: usize = 32;
/// Bytes consumed per displayed 5-digit group.
const GROUP_BYTES: usize = 5;
const GROUPS_PER_KEY: usize = 6;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn of(key: &PublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(digest.into())
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::StorageError(format!("malformed stored fingerprint: {e}")))?;
        let fp: [u8; FINGERPRINT_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::StorageError("malformed stored fingerprint length".into()))?;
        Ok(Self(fp))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Constant-time equality.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    /// 30 digits as 6 space-separated groups of 5.
    pub fn display(&self) -> String {
        self.0
            .chunks(GROUP_BYTES)
            .take(GROUPS_PER_KEY)
            .map(|chunk| {
                let value = chunk.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                format!("{:05}", value % 100_000)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// 60-digit safety number for two keys. Symmetric: both parties compute the
/// same string regardless of which key is "local".
pub fn safety_number(local: &PublicKey, remote: &PublicKey) -> String {
    let mut halves = [Fingerprint::of(local).display(), Fingerprint::of(remote).display()];
    halves.sort();
    halves.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn same_key_same_fingerprint() {
        let pair = KeyPair::generate();
        assert!(Fingerprint::of(pair.public()).matches(&Fingerprint::of(pair.public())));
    }

    #[test]
    fn different_keys_different_fingerprints() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert!(!Fingerprint::of(a.public()).matches(&Fingerprint::of(b.public())));
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::of(KeyPair::generate().public());
        let back = Fingerprint::from_hex(&fp.to_hex()).unwrap();
        assert!(fp.matches(&back));
        assert_eq!(fp.to_hex().len(), 64);
    }

    #[test]
    fn from_hex_rejects_short_input() {
        assert!(Fingerprint::from_hex("abcd").is_err());
        assert!(Fingerprint::from_hex("zz").is_err());
    }

    #[test]
    fn display_is_six_groups_of_five_digits() {
        let fp = Fingerprint::of(KeyPair::generate().public());
        let display = fp.display();
        let groups: Vec<&str> = display.split(' ').collect();
        assert_eq!(groups.len(), 6);
        for group in groups {
            assert_eq!(group.len(), 5);
            assert!(group.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn safety_number_is_symmetric_and_60_digits() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let from_alice = safety_number(alice.public(), bob.public());
        let from_bob = safety_number(bob.public(), alice.public());
        assert_eq!(from_alice, from_bob);

        let digits: String = from_alice.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits.len(), 60);
    }
}

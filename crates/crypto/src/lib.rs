//! rendezvous-crypto: end-to-end encryption for Rendezvous messaging.
//!
//! Provides per-device X25519 identities synced to a backend directory, the
//! multi-device message envelope (v2), the single-key legacy protocol (v1),
//! trust-on-first-use key pinning, AES-256-GCM media encryption, and secure
//! local key storage (OS keychain or SQLCipher).

pub mod cipher;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod keys;
pub mod legacy;
pub mod master_key;
pub mod media;
pub mod pinning;
pub mod storage;
pub mod version;

use async_trait::async_trait;
use dashmap::DashMap;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::storage::SecureStore;

/// Process-local store. Values are wiped when overwritten or dropped.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Zeroizing<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.entries.get(key).map(|v| v.to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), CryptoError> {
        self.entries
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CryptoError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.set("k", b"v1").await.unwrap();
        store.set("k", b"v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v2"[..]));
        assert_eq!(store.len(), 1);

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty());
    }
}

//! In-memory test driver.
//!
//! Behaves like the cloud drivers, tombstones included, so the write and
//! boot paths can be exercised without any cloud access.

use crate::error::{StorageError, StorageResult};
use crate::traits::{Change, SecretStore, TOMBSTONE};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Secret store holding everything in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret directly, bypassing the put bookkeeping.
    /// **For testing only.**
    pub fn seed(&self, name: &str, value: &str) {
        self.secrets
            .lock()
            .insert(name.to_string(), value.to_string());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .secrets
            .lock()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> StorageResult<String> {
        self.secrets
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    async fn put(&self, name: &str, value: &str) -> StorageResult<(String, Change)> {
        let mut secrets = self.secrets.lock();
        let change = match secrets.get(name) {
            None => Change::Inserted,
            Some(current) if current == TOMBSTONE => Change::Inserted,
            Some(_) => Change::Updated,
        };
        secrets.insert(name.to_string(), value.to_string());
        Ok((name.to_string(), change))
    }

    async fn delete(&self, name: &str) -> StorageResult<String> {
        let mut secrets = self.secrets.lock();
        match secrets.get_mut(name) {
            Some(value) => {
                *value = TOMBSTONE.to_string();
                Ok(name.to_string())
            }
            None => Err(StorageError::NotFound(name.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_update_and_tombstone_cycle() {
        let store = MemorySecretStore::new();

        let (_, change) = store.put("macaroon_a_", "v1").await.unwrap();
        assert_eq!(change, Change::Inserted);

        let (_, change) = store.put("macaroon_a_", "v2").await.unwrap();
        assert_eq!(change, Change::Updated);
        assert_eq!(store.get("macaroon_a_").await.unwrap(), "v2");

        store.delete("macaroon_a_").await.unwrap();
        assert_eq!(store.get("macaroon_a_").await.unwrap(), TOMBSTONE);

        // a put over the tombstone is semantically an insert
        let (_, change) = store.put("macaroon_a_", "v3").await.unwrap();
        assert_eq!(change, Change::Inserted);
    }

    #[tokio::test]
    async fn delete_of_missing_secret_errors() {
        let store = MemorySecretStore::new();
        assert!(matches!(
            store.delete("macaroon_a_").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_honors_prefix() {
        let store = MemorySecretStore::new();
        store.seed("macaroon_a_", "{}");
        store.seed("macaroon_b_", "x");
        store.seed("other_c_", "y");

        let names = store.list("macaroon").await.unwrap();
        assert_eq!(names, vec!["macaroon_a_", "macaroon_b_"]);
    }
}

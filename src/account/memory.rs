use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{AccountStore, Identity, Metadata, MetadataUpdate, StoreError};

/// In-process store keyed by user id.
#[derive(Default)]
pub struct MemoryAccountStore {
    records: Mutex<HashMap<String, Metadata>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the record for `user_id`, replacing anything already stored.
    pub async fn insert(&self, user_id: &str, metadata: Metadata) {
        self.records
            .lock()
            .await
            .insert(user_id.to_string(), metadata);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, identity: &Identity) -> Result<Metadata, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .get(&identity.user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(
        &self,
        identity: &Identity,
        metadata: Metadata,
    ) -> Result<Metadata, StoreError> {
        self.records
            .lock()
            .await
            .insert(identity.user_id.clone(), metadata.clone());
        Ok(metadata)
    }

    async fn modify(
        &self,
        identity: &Identity,
        update: MetadataUpdate<'_>,
    ) -> Result<Metadata, StoreError> {
        let mut records = self.records.lock().await;
        let metadata = records.entry(identity.user_id.clone()).or_default();
        update(metadata);
        Ok(metadata.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_identity_is_empty() {
        let store = MemoryAccountStore::new();
        let metadata = store.get(&Identity::new("nobody")).await.unwrap();
        assert!(metadata.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_modify_loses_nothing() {
        let store = Arc::new(MemoryAccountStore::new());
        let mut handles = Vec::new();

        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .modify(&Identity::new("u"), &|m| {
                        let n = m.get("n").and_then(Value::as_u64).unwrap_or(0);
                        m.insert("n".to_string(), Value::from(n + 1));
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metadata = store.get(&Identity::new("u")).await.unwrap();
        assert_eq!(metadata.get("n").and_then(Value::as_u64), Some(25));
    }
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use super::{AccountStore, Identity, Metadata, MetadataUpdate, StoreError};

/// Account metadata persisted to a single JSON file.
///
/// All records are cached in memory and the whole file is rewritten after
/// every change, while the lock is held.
pub struct FileAccountStore {
    data_dir: PathBuf,
    records: Mutex<HashMap<String, Metadata>>,
}

impl FileAccountStore {
    const ACCOUNTS_FILE: &'static str = "accounts.json";

    pub async fn new(data_dir: PathBuf) -> Result<Self, StoreError> {
        let accounts_dir = data_dir.join("accounts");
        tokio::fs::create_dir_all(&accounts_dir).await?;

        let path = accounts_dir.join(Self::ACCOUNTS_FILE);
        let records: HashMap<String, Metadata> = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };

        tracing::debug!("Loaded {} account records from {:?}", records.len(), path);

        Ok(Self {
            data_dir: accounts_dir,
            records: Mutex::new(records),
        })
    }

    fn accounts_file(&self) -> PathBuf {
        self.data_dir.join(Self::ACCOUNTS_FILE)
    }

    async fn save_all(&self, records: &HashMap<String, Metadata>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        tokio::fs::write(self.accounts_file(), content).await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
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
        let mut records = self.records.lock().await;
        let previous = records.insert(identity.user_id.clone(), metadata.clone());

        if let Err(e) = self.save_all(&records).await {
            match previous {
                Some(previous) => records.insert(identity.user_id.clone(), previous),
                None => records.remove(&identity.user_id),
            };
            return Err(e);
        }
        Ok(metadata)
    }

    async fn modify(
        &self,
        identity: &Identity,
        update: MetadataUpdate<'_>,
    ) -> Result<Metadata, StoreError> {
        let mut records = self.records.lock().await;
        let mut metadata = records.get(&identity.user_id).cloned().unwrap_or_default();
        update(&mut metadata);

        let previous = records.insert(identity.user_id.clone(), metadata.clone());
        if let Err(e) = self.save_all(&records).await {
            match previous {
                Some(previous) => records.insert(identity.user_id.clone(), previous),
                None => records.remove(&identity.user_id),
            };
            return Err(e);
        }
        Ok(metadata)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn metadata(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_file_store_persistence() {
        let dir = tempdir().unwrap();
        let identity = Identity::new("user-1");

        {
            let store = FileAccountStore::new(dir.path().to_path_buf()).await.unwrap();
            store
                .update(&identity, metadata(json!({ "isPro": true })))
                .await
                .unwrap();
        }

        {
            let store = FileAccountStore::new(dir.path().to_path_buf()).await.unwrap();
            let stored = store.get(&identity).await.unwrap();
            assert_eq!(stored.get("isPro"), Some(&Value::Bool(true)));
        }
    }

    #[tokio::test]
    async fn test_file_store_concurrent_modify() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileAccountStore::new(dir.path().to_path_buf()).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..10 {
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

        let reopened = FileAccountStore::new(dir.path().to_path_buf()).await.unwrap();
        let stored = reopened.get(&Identity::new("u")).await.unwrap();
        assert_eq!(stored.get("n").and_then(Value::as_u64), Some(10));
    }
}

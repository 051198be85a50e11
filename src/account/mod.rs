//! Per-identity account metadata stores
//!
//! The entitlement tracker keeps its state inside the metadata object attached
//! to an authenticated identity. Stores hand that object back as a raw JSON map
//! so keys owned by other features pass through untouched.

mod file;
mod memory;
mod supabase;

pub use file::FileAccountStore;
pub use memory::MemoryAccountStore;
pub use supabase::SupabaseAccountStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Raw metadata object stored for one identity.
pub type Metadata = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Account service error: {status} - {body}")]
    Http { status: u16, body: String },
    #[error("Account session is missing or expired")]
    Unauthorized,
    #[error("Account store not configured: {0}")]
    NotConfigured(String),
}

/// An authenticated caller.
///
/// `access_token` is only needed by stores that talk to the hosted account
/// service on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_id: String,
    pub access_token: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Mutation applied by [`AccountStore::modify`].
pub type MetadataUpdate<'a> = &'a (dyn Fn(&mut Metadata) + Send + Sync);

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read the full metadata object. Identities with nothing stored yield an
    /// empty map.
    async fn get(&self, identity: &Identity) -> Result<Metadata, StoreError>;

    /// Replace the full metadata object and return what was stored.
    async fn update(&self, identity: &Identity, metadata: Metadata)
        -> Result<Metadata, StoreError>;

    /// Apply `update` to the stored object and return the result.
    ///
    /// The default is read-then-write and can lose concurrent updates; stores
    /// that own their data override it to run under their own lock.
    async fn modify(
        &self,
        identity: &Identity,
        update: MetadataUpdate<'_>,
    ) -> Result<Metadata, StoreError> {
        let mut metadata = self.get(identity).await?;
        update(&mut metadata);
        self.update(identity, metadata).await
    }

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_with_token() {
        let identity = Identity::new("user-1").with_token("jwt");
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.access_token.as_deref(), Some("jwt"));
    }

    #[tokio::test]
    async fn test_default_modify_reads_then_writes() {
        // Supabase-style store relies on the default modify
        struct PassThrough(tokio::sync::Mutex<Metadata>);

        #[async_trait]
        impl AccountStore for PassThrough {
            async fn get(&self, _: &Identity) -> Result<Metadata, StoreError> {
                Ok(self.0.lock().await.clone())
            }

            async fn update(&self, _: &Identity, metadata: Metadata) -> Result<Metadata, StoreError> {
                *self.0.lock().await = metadata.clone();
                Ok(metadata)
            }

            fn name(&self) -> &'static str {
                "pass-through"
            }
        }

        let store = PassThrough(tokio::sync::Mutex::new(Metadata::new()));
        let identity = Identity::new("u");
        let result = store
            .modify(&identity, &|m| {
                m.insert("theme".to_string(), Value::from("dark"));
            })
            .await
            .unwrap();

        assert_eq!(result.get("theme"), Some(&Value::from("dark")));
        assert_eq!(store.get(&identity).await.unwrap(), result);
    }
}

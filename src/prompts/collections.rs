use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::PromptError;

const DEFAULT_COLOR: &str = "#3b82f6";
const DEFAULT_ICON: &str = "📁";

/// A named folder a user groups prompts under
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

pub struct CollectionStore {
    data_dir: PathBuf,
    collections: Vec<Collection>,
}

pub type SharedCollectionStore = Arc<RwLock<CollectionStore>>;

impl CollectionStore {
    const COLLECTIONS_FILE: &'static str = "collections.json";

    pub fn new(data_dir: PathBuf) -> Result<Self, PromptError> {
        let collections_dir = data_dir.join("collections");
        fs::create_dir_all(&collections_dir)?;

        let mut store = Self {
            data_dir: collections_dir,
            collections: Vec::new(),
        };
        store.load_all()?;
        Ok(store)
    }

    fn collections_file(&self) -> PathBuf {
        self.data_dir.join(Self::COLLECTIONS_FILE)
    }

    fn load_all(&mut self) -> Result<(), PromptError> {
        let path = self.collections_file();
        if path.exists() {
            let data = fs::read_to_string(&path)?;
            self.collections = serde_json::from_str(&data)?;
        }
        Ok(())
    }

    fn save_all(&self) -> Result<(), PromptError> {
        let data = serde_json::to_string_pretty(&self.collections)?;
        fs::write(self.collections_file(), data)?;
        Ok(())
    }

    /// Newest first
    pub fn list_for_user(&self, user_id: &str) -> Vec<Collection> {
        let mut collections: Vec<Collection> = self
            .collections
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        collections.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        collections
    }

    pub fn create(
        &mut self,
        user_id: &str,
        new: &NewCollection,
        created_at: DateTime<Utc>,
    ) -> Result<Collection, PromptError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(PromptError::InvalidInput(
                "Collection name is empty".to_string(),
            ));
        }

        let collection = Collection {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: new.description.clone().filter(|d| !d.trim().is_empty()),
            color: new.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            icon: new.icon.clone().unwrap_or_else(|| DEFAULT_ICON.to_string()),
            created_at,
        };

        self.collections.push(collection.clone());
        if let Err(e) = self.save_all() {
            self.collections.pop();
            return Err(e);
        }
        Ok(collection)
    }

    pub fn delete(&mut self, user_id: &str, id: &str) -> Result<bool, PromptError> {
        let Some(index) = self
            .collections
            .iter()
            .position(|c| c.id == id && c.user_id == user_id)
        else {
            return Ok(false);
        };

        let removed = self.collections.remove(index);
        if let Err(e) = self.save_all() {
            self.collections.insert(index, removed);
            return Err(e);
        }
        Ok(true)
    }
}

pub fn create_shared_collections(data_dir: PathBuf) -> Result<SharedCollectionStore, PromptError> {
    Ok(Arc::new(RwLock::new(CollectionStore::new(data_dir)?)))
}

//! Per-user history of enhanced prompts

pub mod collections;

pub use collections::{
    create_shared_collections, Collection, CollectionStore, NewCollection, SharedCollectionStore,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ai::enhance::ScoreBreakdown;
use crate::ai::{EnhanceRequest, EnhancementResult};

const TITLE_CHARS: usize = 50;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// One enhancement run of a prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptVersion {
    pub version: u32,
    pub content: String,
    pub enhanced_content: String,
    pub analysis_result: ScoreBreakdown,
    pub benchmark_score: u32,
    pub model: Option<String>,
    pub mode: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt: String,
    pub enhanced_prompt: String,
    pub benchmark_score: u32,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub mode: String,
    pub model: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub versions: Vec<PromptVersion>,
}

impl PromptRecord {
    /// Case-insensitive match on title, description or any tag
    fn matches(&self, needle: &str) -> bool {
        let contains = |field: &str| field.to_lowercase().contains(needle);

        self.title.as_deref().is_some_and(contains)
            || self.description.as_deref().is_some_and(contains)
            || self.tags.iter().any(|tag| contains(tag.as_str()))
    }
}

/// Fields a user may edit; `None` leaves the field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptFilter {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub favorites: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptListResponse {
    pub prompts: Vec<PromptRecord>,
    pub total: usize,
}

pub struct PromptHistory {
    data_dir: PathBuf,
    records: Vec<PromptRecord>,
}

pub type SharedPromptHistory = Arc<RwLock<PromptHistory>>;

fn title_for(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() > TITLE_CHARS {
        let head: String = prompt.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        prompt.to_string()
    }
}

impl PromptHistory {
    const PROMPTS_FILE: &'static str = "prompts.json";

    pub fn new(data_dir: PathBuf) -> Result<Self, PromptError> {
        let prompts_dir = data_dir.join("prompts");
        fs::create_dir_all(&prompts_dir)?;

        let mut history = Self {
            data_dir: prompts_dir,
            records: Vec::new(),
        };
        history.load_all()?;
        Ok(history)
    }

    fn prompts_file(&self) -> PathBuf {
        self.data_dir.join(Self::PROMPTS_FILE)
    }

    fn load_all(&mut self) -> Result<(), PromptError> {
        let path = self.prompts_file();
        if path.exists() {
            let data = fs::read_to_string(&path)?;
            self.records = serde_json::from_str(&data)?;
        }
        Ok(())
    }

    fn save_all(&self) -> Result<(), PromptError> {
        let data = serde_json::to_string_pretty(&self.records)?;
        fs::write(self.prompts_file(), data)?;
        Ok(())
    }

    /// Persist the current records, restoring `previous` if the write fails.
    fn commit(&mut self, previous: Vec<PromptRecord>) -> Result<(), PromptError> {
        if let Err(e) = self.save_all() {
            self.records = previous;
            return Err(e);
        }
        Ok(())
    }

    fn owned_mut(&mut self, user_id: &str, id: &str) -> Option<&mut PromptRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id && r.user_id == user_id)
    }

    pub fn record(
        &mut self,
        user_id: &str,
        request: &EnhanceRequest,
        result: &EnhancementResult,
        created_at: DateTime<Utc>,
    ) -> Result<PromptRecord, PromptError> {
        let record = PromptRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: Some(title_for(&request.prompt)),
            description: Some(request.prompt.clone()),
            prompt: request.prompt.clone(),
            enhanced_prompt: result.enhanced_prompt.clone(),
            benchmark_score: result.benchmark_score,
            category: result.intent_category.clone(),
            tags: result.tags.clone(),
            mode: request.mode().to_string(),
            model: request.model.clone(),
            is_favorite: false,
            created_at,
            updated_at: Some(created_at),
            versions: vec![PromptVersion {
                version: 1,
                content: request.prompt.clone(),
                enhanced_content: result.enhanced_prompt.clone(),
                analysis_result: result.analysis_result.clone(),
                benchmark_score: result.benchmark_score,
                model: request.model.clone(),
                mode: request.mode().to_string(),
                created_at,
            }],
        };

        self.records.push(record.clone());
        if let Err(e) = self.save_all() {
            self.records.pop();
            return Err(e);
        }
        Ok(record)
    }

    /// Newest first, narrowed by `filter`. `total` counts matches before the
    /// limit is applied.
    pub fn list_for_user(&self, user_id: &str, filter: &PromptFilter) -> PromptListResponse {
        let needle = filter
            .search
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let mut prompts: Vec<PromptRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| !filter.favorites || r.is_favorite)
            .filter(|r| needle.as_deref().map_or(true, |n| r.matches(n)))
            .cloned()
            .collect();
        prompts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = prompts.len();
        if let Some(limit) = filter.limit {
            prompts.truncate(limit);
        }
        PromptListResponse { prompts, total }
    }

    pub fn search(&self, user_id: &str, query: &str) -> Vec<PromptRecord> {
        let filter = PromptFilter {
            search: Some(query.to_string()),
            ..Default::default()
        };
        self.list_for_user(user_id, &filter).prompts
    }

    /// A single record with its versions newest first
    pub fn get(&self, user_id: &str, id: &str) -> Option<PromptRecord> {
        let mut record = self
            .records
            .iter()
            .find(|r| r.id == id && r.user_id == user_id)
            .cloned()?;
        record.versions.sort_by(|a, b| b.version.cmp(&a.version));
        Some(record)
    }

    /// Oldest first, for analytics
    pub fn records_for_user(&self, user_id: &str) -> Vec<PromptRecord> {
        let mut records: Vec<PromptRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn update(
        &mut self,
        user_id: &str,
        id: &str,
        update: &PromptUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<PromptRecord>, PromptError> {
        let previous = self.records.clone();
        let Some(record) = self.owned_mut(user_id, id) else {
            return Ok(None);
        };

        if let Some(title) = &update.title {
            record.title = Some(title.clone());
        }
        if let Some(description) = &update.description {
            record.description = Some(description.clone());
        }
        if let Some(category) = &update.category {
            record.category = Some(category.clone());
        }
        if let Some(tags) = &update.tags {
            record.tags = tags.clone();
        }
        if let Some(is_favorite) = update.is_favorite {
            record.is_favorite = is_favorite;
        }
        record.updated_at = Some(at);
        let updated = record.clone();

        self.commit(previous)?;
        Ok(Some(updated))
    }

    pub fn toggle_favorite(
        &mut self,
        user_id: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PromptRecord>, PromptError> {
        let is_favorite = match self.records.iter().find(|r| r.id == id && r.user_id == user_id) {
            Some(record) => record.is_favorite,
            None => return Ok(None),
        };
        let update = PromptUpdate {
            is_favorite: Some(!is_favorite),
            ..Default::default()
        };
        self.update(user_id, id, &update, at)
    }

    /// Set the favorite flag on every listed record the user owns.
    /// Returns how many records matched.
    pub fn set_favorite_many(
        &mut self,
        user_id: &str,
        ids: &[String],
        favorite: bool,
        at: DateTime<Utc>,
    ) -> Result<usize, PromptError> {
        let previous = self.records.clone();
        let mut changed = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.user_id == user_id && ids.contains(&r.id))
        {
            record.is_favorite = favorite;
            record.updated_at = Some(at);
            changed += 1;
        }

        if changed > 0 {
            self.commit(previous)?;
        }
        Ok(changed)
    }

    pub fn delete(&mut self, user_id: &str, id: &str) -> Result<bool, PromptError> {
        Ok(self.delete_many(user_id, &[id.to_string()])? > 0)
    }

    /// Delete every listed record the user owns. Ids owned by someone else
    /// are skipped.
    pub fn delete_many(&mut self, user_id: &str, ids: &[String]) -> Result<usize, PromptError> {
        let previous = self.records.clone();
        self.records
            .retain(|r| !(r.user_id == user_id && ids.contains(&r.id)));

        let removed = previous.len() - self.records.len();
        if removed > 0 {
            self.commit(previous)?;
        }
        Ok(removed)
    }
}

pub fn create_shared_history(data_dir: PathBuf) -> Result<SharedPromptHistory, PromptError> {
    Ok(Arc::new(RwLock::new(PromptHistory::new(data_dir)?)))
}

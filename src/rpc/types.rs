use serde::{Deserialize, Serialize};

use crate::account::Identity;
use crate::ai::{EnhanceRequest, EnhancementResult};
use crate::prompts::{NewCollection, PromptFilter, PromptUpdate};
use crate::tier::UsageStatus;

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub result: EnhancementResult,
    pub prompt_id: Option<String>,
    pub usage: UsageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub affected: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResponse {
    pub version: String,
    pub store: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Caller fields shared by every stdio method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserParams {
    pub user_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl UserParams {
    pub fn identity(&self) -> Option<Identity> {
        let user_id = self.user_id.as_deref().filter(|id| !id.trim().is_empty())?;
        let identity = Identity::new(user_id);
        Some(match &self.access_token {
            Some(token) => identity.with_token(token.clone()),
            None => identity,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceParams {
    #[serde(flatten)]
    pub user: UserParams,
    #[serde(flatten)]
    pub request: EnhanceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptListParams {
    #[serde(flatten)]
    pub user: UserParams,
    #[serde(flatten)]
    pub filter: PromptFilter,
}

/// Methods addressing one prompt or collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdParams {
    #[serde(flatten)]
    pub user: UserParams,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUpdateParams {
    #[serde(flatten)]
    pub user: UserParams,
    pub id: String,
    #[serde(flatten)]
    pub update: PromptUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkParams {
    #[serde(flatten)]
    pub user: UserParams,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCreateParams {
    #[serde(flatten)]
    pub user: UserParams,
    #[serde(flatten)]
    pub collection: NewCollection,
}

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use crate::account::{AccountStore, Identity};
use crate::ai::{self, CompletionProvider, EnhanceRequest};
use crate::analytics::{self, AnalyticsSummary};
use crate::config::AppConfig;
use crate::prompts::{
    self, Collection, NewCollection, PromptError, PromptFilter, PromptListResponse, PromptRecord,
    PromptUpdate, SharedCollectionStore, SharedPromptHistory,
};
use crate::tier::{
    extract_identity_from_headers, Clock, EntitlementTracker, FeatureGate, SystemClock, TierError,
    TierErrorResponse, TrialCountdown, UsageStatus,
};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Tier(#[from] TierError),
    #[error("Daily analysis limit reached")]
    LimitReached(FeatureGate),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("No completion provider configured")]
    NoProvider,
    #[error("Enhancement failed: {0:#}")]
    Completion(anyhow::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Prompt history error: {0}")]
    Prompt(#[from] PromptError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let error = self.to_string();
        let status = match self {
            ServiceError::Tier(err) => return TierErrorResponse::from(err).into_response(),
            ServiceError::LimitReached(gate) => match TierErrorResponse::from_gate(gate) {
                Some(err) => return err.into_response(),
                None => StatusCode::TOO_MANY_REQUESTS,
            },
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Completion(_) => StatusCode::BAD_GATEWAY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Prompt(PromptError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Prompt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AccountStore>,
    pub clock: Arc<dyn Clock>,
    pub provider: Option<Arc<dyn CompletionProvider>>,
    pub prompts: SharedPromptHistory,
    pub collections: SharedCollectionStore,
    /// Running trial countdowns by user id; each closes its trial when the
    /// window ends, even if the user never calls back
    pub countdowns: Arc<Mutex<HashMap<String, TrialCountdown>>>,
}

impl AppState {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = config.account_store().await?;
        let provider = match ai::create_provider(&config.llm) {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!("Enhancement disabled: {}", e);
                None
            }
        };
        let prompts = prompts::create_shared_history(config.data_dir.clone())?;
        let collections = prompts::create_shared_collections(config.data_dir.clone())?;

        tracing::info!(
            "Using {} account store, {} completion provider",
            store.name(),
            provider.as_ref().map(|p| p.name()).unwrap_or("no")
        );

        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            provider,
            prompts,
            collections,
            countdowns: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn tracker_for(
        &self,
        identity: Option<Identity>,
    ) -> Result<EntitlementTracker<dyn AccountStore>, TierError> {
        let tracker = EntitlementTracker::new(self.store.clone(), self.clock.clone());
        tracker.load(identity).await?;
        Ok(tracker)
    }

    pub async fn usage_status(&self, identity: Option<Identity>) -> Result<UsageStatus, TierError> {
        Ok(self.tracker_for(identity).await?.status().await)
    }

    pub async fn increment_usage(&self, identity: Option<Identity>) -> Result<UsageStatus, TierError> {
        let tracker = self.tracker_for(identity).await?;
        tracker.increment_usage().await?;
        Ok(tracker.status().await)
    }

    pub async fn start_trial(&self, identity: Option<Identity>) -> Result<UsageStatus, TierError> {
        let tracker = Arc::new(self.tracker_for(identity).await?);
        tracker.start_trial().await?;
        let status = tracker.status().await;

        if let Some(identity) = tracker.identity().await {
            let mut countdowns = self.countdowns.lock().await;
            countdowns.retain(|_, countdown| !countdown.is_finished());
            countdowns.insert(identity.user_id, TrialCountdown::spawn(tracker));
        }
        Ok(status)
    }

    pub async fn toggle_pro(&self, identity: Option<Identity>) -> Result<UsageStatus, TierError> {
        let tracker = self.tracker_for(identity).await?;
        tracker.toggle_pro().await?;
        Ok(tracker.status().await)
    }

    /// Enhance a prompt for a signed-in user, counting it against their
    /// daily quota once the completion succeeds.
    pub async fn generate(
        &self,
        identity: Option<Identity>,
        request: EnhanceRequest,
    ) -> Result<GenerateResponse, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        if request.prompt.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("Prompt is empty".to_string()));
        }
        let provider = self.provider.clone().ok_or(ServiceError::NoProvider)?;

        let tracker = self.tracker_for(Some(identity.clone())).await?;
        let gate = tracker.check_analysis().await;
        if !gate.is_allowed() {
            return Err(ServiceError::LimitReached(gate));
        }

        let result = ai::enhance(provider.as_ref(), &request)
            .await
            .map_err(ServiceError::Completion)?;

        let prompt_id = match self.prompts.write().await.record(
            &identity.user_id,
            &request,
            &result,
            self.clock.now(),
        ) {
            Ok(record) => Some(record.id),
            Err(e) => {
                tracing::warn!("Failed to save prompt for {}: {}", identity.user_id, e);
                None
            }
        };

        if let Err(e) = tracker.increment_usage().await {
            tracing::warn!("Usage not recorded for {}: {}", identity.user_id, e);
        }

        Ok(GenerateResponse {
            result,
            prompt_id,
            usage: tracker.status().await,
        })
    }

    pub async fn list_prompts(
        &self,
        identity: Option<Identity>,
        filter: &PromptFilter,
    ) -> Result<PromptListResponse, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self.prompts.read().await.list_for_user(&identity.user_id, filter))
    }

    pub async fn get_prompt(&self, identity: Option<Identity>, id: &str) -> Result<PromptRecord, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        self.prompts
            .read()
            .await
            .get(&identity.user_id, id)
            .ok_or_else(|| ServiceError::NotFound(format!("prompt {}", id)))
    }

    pub async fn update_prompt(
        &self,
        identity: Option<Identity>,
        id: &str,
        update: &PromptUpdate,
    ) -> Result<PromptRecord, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        self.prompts
            .write()
            .await
            .update(&identity.user_id, id, update, self.clock.now())?
            .ok_or_else(|| ServiceError::NotFound(format!("prompt {}", id)))
    }

    pub async fn toggle_favorite(&self, identity: Option<Identity>, id: &str) -> Result<PromptRecord, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        self.prompts
            .write()
            .await
            .toggle_favorite(&identity.user_id, id, self.clock.now())?
            .ok_or_else(|| ServiceError::NotFound(format!("prompt {}", id)))
    }

    pub async fn delete_prompt(&self, identity: Option<Identity>, id: &str) -> Result<bool, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self.prompts.write().await.delete(&identity.user_id, id)?)
    }

    pub async fn delete_prompts(&self, identity: Option<Identity>, ids: &[String]) -> Result<usize, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self.prompts.write().await.delete_many(&identity.user_id, ids)?)
    }

    pub async fn favorite_prompts(&self, identity: Option<Identity>, ids: &[String]) -> Result<usize, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self
            .prompts
            .write()
            .await
            .set_favorite_many(&identity.user_id, ids, true, self.clock.now())?)
    }

    pub async fn list_collections(&self, identity: Option<Identity>) -> Result<Vec<Collection>, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self.collections.read().await.list_for_user(&identity.user_id))
    }

    pub async fn create_collection(
        &self,
        identity: Option<Identity>,
        new: &NewCollection,
    ) -> Result<Collection, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self
            .collections
            .write()
            .await
            .create(&identity.user_id, new, self.clock.now())?)
    }

    pub async fn delete_collection(&self, identity: Option<Identity>, id: &str) -> Result<bool, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        Ok(self.collections.write().await.delete(&identity.user_id, id)?)
    }

    pub async fn analytics(&self, identity: Option<Identity>) -> Result<AnalyticsSummary, ServiceError> {
        let identity = identity.ok_or(TierError::NoIdentity)?;
        let records = self.prompts.read().await.records_for_user(&identity.user_id);
        Ok(analytics::summarize(&records))
    }

    fn system_status(&self) -> SystemStatusResponse {
        SystemStatusResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: self.store.name().to_string(),
            provider: self.provider.as_ref().map(|p| p.name().to_string()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(system_status))
        .route("/api/usage", get(usage_status))
        .route("/api/usage/increment", post(usage_increment))
        .route("/api/trial/start", post(trial_start))
        .route("/api/pro/toggle", post(pro_toggle))
        .route("/api/generate", post(generate))
        .route("/api/prompts", get(list_prompts))
        .route("/api/prompts/bulk/delete", post(bulk_delete_prompts))
        .route("/api/prompts/bulk/favorite", post(bulk_favorite_prompts))
        .route(
            "/api/prompts/{id}",
            get(get_prompt).patch(update_prompt).delete(delete_prompt),
        )
        .route("/api/prompts/{id}/favorite", post(toggle_favorite))
        .route("/api/collections", get(list_collections).post(create_collection))
        .route("/api/collections/{id}", delete(delete_collection))
        .route("/api/analytics", get(analytics_summary))
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn run_http_server(config: &AppConfig, host: &str, port: u16) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn run_stdio_server(config: &AppConfig) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();

    tracing::info!("JSON-RPC server running on stdio");

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_jsonrpc_request(&state, line).await;

        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn system_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.system_status()))
}

fn status_response(result: Result<UsageStatus, TierError>) -> Response {
    match result {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => TierErrorResponse::from(err).into_response(),
    }
}

async fn usage_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    status_response(state.usage_status(identity).await)
}

async fn usage_increment(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    status_response(state.increment_usage(identity).await)
}

async fn trial_start(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    status_response(state.start_trial(identity).await)
}

async fn pro_toggle(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    status_response(state.toggle_pro(identity).await)
}

async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<EnhanceRequest>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.generate(identity, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            tracing::error!("Generation error: {}", err);
            err.into_response()
        }
    }
}

async fn list_prompts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(filter): Query<PromptFilter>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.list_prompts(identity, &filter).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.get_prompt(identity, &id).await {
        Ok(prompt) => (StatusCode::OK, Json(prompt)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn update_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<PromptUpdate>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.update_prompt(identity, &id, &update).await {
        Ok(prompt) => (StatusCode::OK, Json(prompt)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.toggle_favorite(identity, &id).await {
        Ok(prompt) => (StatusCode::OK, Json(prompt)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_prompt(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.delete_prompt(identity, &id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => ServiceError::NotFound(format!("prompt {}", id)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn bulk_delete_prompts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<BulkRequest>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.delete_prompts(identity, &request.ids).await {
        Ok(affected) => (StatusCode::OK, Json(BulkResponse { affected })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn bulk_favorite_prompts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<BulkRequest>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.favorite_prompts(identity, &request.ids).await {
        Ok(affected) => (StatusCode::OK, Json(BulkResponse { affected })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list_collections(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.list_collections(identity).await {
        Ok(collections) => (StatusCode::OK, Json(collections)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewCollection>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.create_collection(identity, &new).await {
        Ok(collection) => (StatusCode::CREATED, Json(collection)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.delete_collection(identity, &id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => ServiceError::NotFound(format!("collection {}", id)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn analytics_summary(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let identity = extract_identity_from_headers(&headers);
    match state.analytics(identity).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_jsonrpc_request(state: &AppState, request: &str) -> String {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(request);

    match parsed {
        Ok(json) => {
            let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
            let params = json
                .get("params")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let id = json.get("id").cloned().unwrap_or(serde_json::Value::Null);

            let result = dispatch_method(state, method, params).await;

            match result {
                Ok(value) => serde_json::json!({
                    "jsonrpc": "2.0",
                    "result": value,
                    "id": id
                })
                .to_string(),
                Err(e) => serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": {
                        "code": -32000,
                        "message": e.to_string()
                    },
                    "id": id
                })
                .to_string(),
            }
        }
        Err(e) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32700,
                "message": format!("Parse error: {}", e)
            },
            "id": null
        })
        .to_string(),
    }
}

fn user_params(params: &serde_json::Value) -> Result<UserParams> {
    if params.is_null() {
        return Ok(UserParams {
            user_id: None,
            access_token: None,
        });
    }
    Ok(serde_json::from_value(params.clone())?)
}

async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value> {
    match method {
        "usage.status" => {
            let user = user_params(&params)?;
            let status = state.usage_status(user.identity()).await?;
            Ok(serde_json::to_value(status)?)
        }
        "usage.increment" => {
            let user = user_params(&params)?;
            let status = state.increment_usage(user.identity()).await?;
            Ok(serde_json::to_value(status)?)
        }
        "trial.start" => {
            let user = user_params(&params)?;
            let status = state.start_trial(user.identity()).await?;
            Ok(serde_json::to_value(status)?)
        }
        "pro.toggle" => {
            let user = user_params(&params)?;
            let status = state.toggle_pro(user.identity()).await?;
            Ok(serde_json::to_value(status)?)
        }
        "prompt.enhance" => {
            let params: EnhanceParams = serde_json::from_value(params)?;
            let response = state.generate(params.user.identity(), params.request).await?;
            Ok(serde_json::to_value(response)?)
        }
        "prompts.list" => {
            let params: PromptListParams = serde_json::from_value(params)?;
            let response = state
                .list_prompts(params.user.identity(), &params.filter)
                .await?;
            Ok(serde_json::to_value(response)?)
        }
        "prompts.get" => {
            let params: IdParams = serde_json::from_value(params)?;
            let prompt = state.get_prompt(params.user.identity(), &params.id).await?;
            Ok(serde_json::to_value(prompt)?)
        }
        "prompts.update" => {
            let params: PromptUpdateParams = serde_json::from_value(params)?;
            let prompt = state
                .update_prompt(params.user.identity(), &params.id, &params.update)
                .await?;
            Ok(serde_json::to_value(prompt)?)
        }
        "prompts.toggle_favorite" => {
            let params: IdParams = serde_json::from_value(params)?;
            let prompt = state.toggle_favorite(params.user.identity(), &params.id).await?;
            Ok(serde_json::to_value(prompt)?)
        }
        "prompts.delete" => {
            let params: IdParams = serde_json::from_value(params)?;
            let deleted = state.delete_prompt(params.user.identity(), &params.id).await?;
            Ok(serde_json::json!({ "deleted": deleted }))
        }
        "prompts.delete_many" => {
            let params: BulkParams = serde_json::from_value(params)?;
            let affected = state.delete_prompts(params.user.identity(), &params.ids).await?;
            Ok(serde_json::to_value(BulkResponse { affected })?)
        }
        "prompts.favorite_many" => {
            let params: BulkParams = serde_json::from_value(params)?;
            let affected = state.favorite_prompts(params.user.identity(), &params.ids).await?;
            Ok(serde_json::to_value(BulkResponse { affected })?)
        }
        "collections.list" => {
            let user = user_params(&params)?;
            let collections = state.list_collections(user.identity()).await?;
            Ok(serde_json::to_value(collections)?)
        }
        "collections.create" => {
            let params: CollectionCreateParams = serde_json::from_value(params)?;
            let collection = state
                .create_collection(params.user.identity(), &params.collection)
                .await?;
            Ok(serde_json::to_value(collection)?)
        }
        "collections.delete" => {
            let params: IdParams = serde_json::from_value(params)?;
            let deleted = state.delete_collection(params.user.identity(), &params.id).await?;
            Ok(serde_json::json!({ "deleted": deleted }))
        }
        "analytics.summary" => {
            let user = user_params(&params)?;
            let summary = state.analytics(user.identity()).await?;
            Ok(serde_json::to_value(summary)?)
        }
        "system.status" => Ok(serde_json::to_value(state.system_status())?),
        _ => anyhow::bail!("Unknown method: {}", method),
    }
}

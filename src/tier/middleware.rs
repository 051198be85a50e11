//! Identity extraction and tier error responses for the HTTP surface

use axum::{
    http::{header::HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::limits::FeatureGate;
use super::tracker::TierError;
use crate::account::{Identity, StoreError};

const USER_HEADER: &str = "x-metaprompt-user";

/// Caller identity from `x-metaprompt-user`, with the bearer token forwarded
/// for stores that act on the user's behalf.
pub fn extract_identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let identity = Identity::new(user_id);
    Some(match token {
        Some(token) => identity.with_token(token),
        None => identity,
    })
}

#[derive(Debug, Serialize)]
pub struct TierErrorResponse {
    pub error: String,
    pub code: TierErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierErrorCode {
    NoIdentity,
    DailyLimit,
    TrialUsed,
    TrialActive,
    AlreadyPro,
    StoreUnavailable,
}

impl TierErrorResponse {
    fn new(error: String, code: TierErrorCode) -> Self {
        Self {
            error,
            code,
            used: None,
            limit: None,
            resets_at: None,
        }
    }

    pub fn from_gate(gate: FeatureGate) -> Option<Self> {
        match gate {
            FeatureGate::Allowed => None,
            FeatureGate::DailyLimitReached {
                used,
                limit,
                resets_at,
            } => Some(Self {
                error: format!("Daily analysis limit reached ({}/{})", used, limit),
                code: TierErrorCode::DailyLimit,
                used: Some(used),
                limit: Some(limit),
                resets_at: Some(resets_at.to_rfc3339()),
            }),
        }
    }

    fn status(&self) -> StatusCode {
        match self.code {
            TierErrorCode::NoIdentity => StatusCode::UNAUTHORIZED,
            TierErrorCode::DailyLimit => StatusCode::TOO_MANY_REQUESTS,
            TierErrorCode::TrialUsed | TierErrorCode::TrialActive | TierErrorCode::AlreadyPro => {
                StatusCode::CONFLICT
            }
            TierErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<TierError> for TierErrorResponse {
    fn from(err: TierError) -> Self {
        let code = match &err {
            TierError::NoIdentity => TierErrorCode::NoIdentity,
            TierError::TrialAlreadyUsed => TierErrorCode::TrialUsed,
            TierError::TrialAlreadyActive => TierErrorCode::TrialActive,
            TierError::AlreadyPro => TierErrorCode::AlreadyPro,
            TierError::Store(StoreError::Unauthorized) => TierErrorCode::NoIdentity,
            TierError::Store(_) => TierErrorCode::StoreUnavailable,
        };
        Self::new(err.to_string(), code)
    }
}

impl IntoResponse for TierErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

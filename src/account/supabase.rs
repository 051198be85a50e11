use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{AccountStore, Identity, Metadata, StoreError};

/// Hosted auth service keeping the metadata on the user record.
///
/// Reads and writes act on behalf of the caller, so every identity must carry
/// its access token. The service has no conditional update, so `modify` uses
/// the trait's read-then-write default.
pub struct SupabaseAccountStore {
    client: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct UserResponse {
    #[serde(default)]
    user_metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct UpdateUserRequest<'a> {
    data: &'a Metadata,
}

impl SupabaseAccountStore {
    pub fn new(base_url: String, anon_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }

    fn user_url(&self) -> String {
        format!("{}/auth/v1/user", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder, identity: &Identity) -> Result<RequestBuilder, StoreError> {
        let token = identity
            .access_token
            .as_deref()
            .ok_or(StoreError::Unauthorized)?;
        Ok(request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token)))
    }

    async fn read_user(response: Response) -> Result<Metadata, StoreError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let user: UserResponse = response.json().await?;
        Ok(user.user_metadata.unwrap_or_default())
    }
}

#[async_trait]
impl AccountStore for SupabaseAccountStore {
    async fn get(&self, identity: &Identity) -> Result<Metadata, StoreError> {
        let request = self.authorize(self.client.get(self.user_url()), identity)?;
        let response = request.send().await?;
        Self::read_user(response).await
    }

    async fn update(
        &self,
        identity: &Identity,
        metadata: Metadata,
    ) -> Result<Metadata, StoreError> {
        let request = self.authorize(self.client.put(self.user_url()), identity)?;
        let response = request
            .json(&UpdateUserRequest { data: &metadata })
            .send()
            .await?;
        Self::read_user(response).await
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_url_trims_trailing_slash() {
        let store = SupabaseAccountStore::new(
            "https://project.supabase.co/".to_string(),
            "anon".to_string(),
        );
        assert_eq!(store.user_url(), "https://project.supabase.co/auth/v1/user");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let store = SupabaseAccountStore::new("http://127.0.0.1:9".to_string(), "anon".to_string());
        let err = store.get(&Identity::new("u")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized));
    }

    #[test]
    fn test_user_response_without_metadata() {
        let user: UserResponse = serde_json::from_value(json!({ "id": "u" })).unwrap();
        assert!(user.user_metadata.is_none());
    }
}

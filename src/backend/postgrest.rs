use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::session::{ProfileStore, StoreError};
use crate::types::{Profile, ProfileDefaults, RoleTag};

/// Profile store speaking to a hosted PostgREST endpoint (`/rest/v1/profiles`)
pub struct PostgrestProfileStore {
    client: Client,
    profiles_url: Url,
    service_key: String,
}

/// Row shape as PostgREST returns it; every column but `id` may be null
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileRow {
    id: Uuid,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .unwrap_or_default()
            .parse::<RoleTag>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Profile {
            user_id: row.id,
            full_name: row.full_name,
            email: row.email.unwrap_or_default(),
            role,
            city: row.city,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        })
    }
}

impl PostgrestProfileStore {
    pub fn new(rest_url: &str, service_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let profiles_url = profiles_url(rest_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            profiles_url,
            service_key: service_key.to_string(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<ProfileRow>, StoreError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(classify_transport)?;
        let response = check_status(response).await?;
        response
            .json::<Vec<ProfileRow>>()
            .await
            .map_err(|e| StoreError::Backend(format!("unreadable profile rows: {}", e)))
    }
}

fn profiles_url(rest_url: &str) -> Result<Url, StoreError> {
    let raw = format!("{}/rest/v1/profiles", rest_url.trim_end_matches('/'));
    Url::parse(&raw).map_err(|e| StoreError::Backend(format!("invalid REST URL {}: {}", rest_url, e)))
}

fn eq(id: Uuid) -> String {
    format!("eq.{}", id)
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        let request = self
            .client
            .get(self.profiles_url.clone())
            .query(&[("select", "*".to_string()), ("id", eq(user_id))]);

        let rows = self.send_for_rows(request).await?;
        rows.into_iter().next().map(Profile::try_from).transpose()
    }

    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<Profile, StoreError> {
        let body = ProfileRow {
            id: user_id,
            full_name: defaults.full_name.clone(),
            email: Some(defaults.email.clone()),
            role: Some(RoleTag::Unset.as_str().to_string()),
            city: defaults.city.clone(),
            created_at: None,
        };
        let request = self
            .client
            .post(self.profiles_url.clone())
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&[body]);

        let rows = self.send_for_rows(request).await?;
        if let Some(row) = rows.into_iter().next() {
            debug!("Created profile {}", user_id);
            return Profile::try_from(row);
        }

        // Duplicate ignored: someone else created it first
        self.get_profile(user_id)
            .await?
            .ok_or_else(|| StoreError::Conflict(format!("profile {} vanished after conflict", user_id)))
    }

    async fn update_role(&self, user_id: Uuid, role: RoleTag) -> Result<Profile, StoreError> {
        let request = self
            .client
            .patch(self.profiles_url.clone())
            .query(&[("id", eq(user_id)), ("role", "in.(unset,none)".to_string())])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "role": role.as_str() }));

        let rows = self.send_for_rows(request).await?;
        if let Some(row) = rows.into_iter().next() {
            return Profile::try_from(row);
        }

        match self.get_profile(user_id).await? {
            Some(existing) => Err(StoreError::Conflict(format!(
                "role already set to {}",
                existing.role
            ))),
            None => Err(StoreError::NotFound(user_id)),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let request = self
            .client
            .get(self.profiles_url.clone())
            .query(&[("select", "id"), ("limit", "1")]);
        self.send_for_rows(request).await.map(|_| ())
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("Profile endpoint answered {}: {}", status, body);
    Err(classify_status(status, body))
}

fn classify_status(status: StatusCode, body: String) -> StoreError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    match status {
        StatusCode::CONFLICT => StoreError::Conflict(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => StoreError::Transient(detail),
        s if s.is_server_error() => StoreError::Transient(detail),
        _ => StoreError::Backend(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

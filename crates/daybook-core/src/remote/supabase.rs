//! Supabase (PostgREST) remote store client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::models::RemoteId;
use crate::util::normalize_text_option;

use super::{AnalysisStore, EntryStore, RemoteEntry, RemoteError, RemoteResult};

const ENTRIES_TABLE: &str = "journal_entries";
const ANALYSES_TABLE: &str = "journal_analyses";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// PostgREST client for the hosted journal tables.
///
/// Each instance is scoped to one authenticated session: row-level
/// security on the backend restricts reads and writes to the bearer
/// token's user.
#[derive(Clone)]
pub struct SupabaseEntryStore {
    rest_url: String,
    anon_key: String,
    access_token: String,
    client: reqwest::Client,
}

impl SupabaseEntryStore {
    /// Build a store for the given project URL and session token.
    ///
    /// Requests carry a client-side timeout; a timed-out write surfaces
    /// as a regular remote failure and feeds the caller's retry counter.
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> RemoteResult<Self> {
        let rest_url = normalize_rest_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "Supabase anon key must not be empty".to_string(),
            ));
        }
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "Supabase access token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url,
            anon_key,
            access_token,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
    }

    async fn expect_success(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api(parse_api_error(status, &body)))
    }
}

#[async_trait]
impl EntryStore for SupabaseEntryStore {
    async fn create_entry(&self, title: &str, content: &str) -> RemoteResult<RemoteEntry> {
        let payload = serde_json::json!({
            "title": title,
            "content": content,
        });

        let request = self
            .authed(self.client.post(format!("{}/{ENTRIES_TABLE}", self.rest_url)))
            .header("Prefer", "return=representation")
            .json(&payload);

        let response = Self::expect_success(request.send().await?).await?;
        let mut rows = response.json::<Vec<RemoteEntryRow>>().await?;
        let row = rows.pop().ok_or_else(|| {
            RemoteError::InvalidPayload("create response did not include the stored row".to_string())
        })?;
        row.try_into()
    }

    async fn list_entries(&self) -> RemoteResult<Vec<RemoteEntry>> {
        let request = self.authed(self.client.get(format!(
            "{}/{ENTRIES_TABLE}?select=id,title,content,created_at&order=created_at.desc",
            self.rest_url
        )));

        let response = Self::expect_success(request.send().await?).await?;
        let rows = response.json::<Vec<RemoteEntryRow>>().await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl AnalysisStore for SupabaseEntryStore {
    async fn attach_analysis(
        &self,
        remote_id: &RemoteId,
        payload: &serde_json::Value,
    ) -> RemoteResult<()> {
        let body = serde_json::json!({
            "entry_id": remote_id.as_str(),
            "analysis": payload,
        });

        let request = self
            .authed(self.client.post(format!("{}/{ANALYSES_TABLE}", self.rest_url)))
            .json(&body);

        Self::expect_success(request.send().await?).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteEntryRow {
    id: serde_json::Value,
    title: Option<String>,
    content: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<RemoteEntryRow> for RemoteEntry {
    type Error = RemoteError;

    fn try_from(row: RemoteEntryRow) -> RemoteResult<Self> {
        // PostgREST serializes integer primary keys as numbers and uuid
        // keys as strings; accept both.
        let id = match row.id {
            serde_json::Value::String(id) => id,
            serde_json::Value::Number(id) => id.to_string(),
            other => {
                return Err(RemoteError::InvalidPayload(format!(
                    "unexpected id value: {other}"
                )))
            }
        };

        let created_at = row
            .created_at
            .as_deref()
            .map(parse_timestamp_ms)
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            id: RemoteId::new(id),
            title: row.title.unwrap_or_default(),
            content: row.content.unwrap_or_default(),
            created_at,
        })
    }
}

fn parse_timestamp_ms(raw: &str) -> RemoteResult<i64> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.timestamp_millis())
        .map_err(|error| {
            RemoteError::InvalidPayload(format!("invalid created_at timestamp {raw:?}: {error}"))
        })
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.details) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_rest_url(url: &str) -> RemoteResult<String> {
    let trimmed = normalize_text_option(Some(url.to_string())).ok_or_else(|| {
        RemoteError::InvalidConfiguration("Supabase URL must not be empty".to_string())
    })?;
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(RemoteError::InvalidConfiguration(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }

    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}

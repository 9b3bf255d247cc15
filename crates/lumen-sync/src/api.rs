use crate::error::ApiError;
use crate::transport::HttpFrameSource;
use lumen_core::pager::{ExportFormat, HistoryFilters, HistoryPage, HistoryTable, PageCursor};
use lumen_core::{CleanupOutcome, Job, RetentionOverrides, RetentionStatus};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const STREAM_PATH: &str = "/api/stream";
pub const JOBS_PATH: &str = "/api/jobs";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The stream uses the same credentials but no request timeout.
    pub fn stream_source(&self) -> HttpFrameSource {
        HttpFrameSource::new(self.http.clone(), self.url(STREAM_PATH), self.token.clone())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(REQUEST_TIMEOUT);
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ApiError> {
        debug!(event = "api_get", path, params = query.len());
        let request = self.authorize(self.http.get(self.url(path)).query(query));
        let response = check_status(request.send().await?).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }

    pub async fn history_page(
        &self,
        table: HistoryTable,
        cursor: &PageCursor,
        filters: &HistoryFilters,
    ) -> Result<HistoryPage<Value>, ApiError> {
        self.get_json(&history_path(table), &cursor.build_query(filters))
            .await
    }

    pub async fn export(
        &self,
        table: HistoryTable,
        cursor: &PageCursor,
        filters: &HistoryFilters,
        format: ExportFormat,
        limit: i64,
    ) -> Result<String, ApiError> {
        let query = cursor.export_query(filters, format, limit);
        debug!(event = "api_export", table = table.as_str(), format = format.as_str());
        let request = self.authorize(self.http.get(self.url(&history_path(table))).query(&query));
        let response = check_status(request.send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn retention_status(&self, table: HistoryTable) -> Result<RetentionStatus, ApiError> {
        self.get_json(&format!("/api/retention/{}/status", table.as_str()), &[])
            .await
    }

    pub async fn run_retention(
        &self,
        table: HistoryTable,
        overrides: Option<RetentionOverrides>,
    ) -> Result<CleanupOutcome, ApiError> {
        let path = format!("/api/retention/{}/run", table.as_str());
        let body = overrides.unwrap_or_default();
        let request = self.authorize(self.http.post(self.url(&path)).json(&body));
        let response = check_status(request.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CleanupOutcome::default());
        }
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        let body: Value = self.get_json(JOBS_PATH, &[]).await?;
        let list = match body {
            Value::Array(items) => Value::Array(items),
            Value::Object(mut map) => map
                .remove("items")
                .or_else(|| map.remove("jobs"))
                .ok_or_else(|| ApiError::Decode("job list missing items".to_string()))?,
            other => {
                return Err(ApiError::Decode(format!("unexpected job list: {other}")));
            }
        };
        serde_json::from_value(list).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

pub fn history_path(table: HistoryTable) -> String {
    format!("/api/history/{}", table.as_str())
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = server_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Forbidden { message });
    }
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

fn server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = map.get(key).and_then(Value::as_str) {
                return Some(text.to_string());
            }
        }
    }
    Some(trimmed.chars().take(300).collect())
}

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;
pub const MAX_EXPORT_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HistoryTable {
    Events,
    Audit,
    Metrics,
    Jobs,
}

impl HistoryTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Audit => "audit",
            Self::Metrics => "metrics",
            Self::Jobs => "jobs",
        }
    }
}

impl fmt::Display for HistoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryTable {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "events" | "event" => Ok(Self::Events),
            "audit" | "audit_log" | "audit-log" => Ok(Self::Audit),
            "metrics" | "metric" => Ok(Self::Metrics),
            "jobs" | "job_log" | "job-log" => Ok(Self::Jobs),
            other => Err(format!("Unknown history table: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Offset { offset: u64 },
    AfterId { after_id: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Ndjson,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Ndjson => "ndjson",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(format!("Unknown export format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilters {
    pub text: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<f64>,
    pub until: Option<f64>,
}

impl HistoryFilters {
    fn append_to(&self, params: &mut Vec<(String, String)>) {
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            params.push(("q".to_string(), text.to_string()));
        }
        if let Some(kind) = self
            .event_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            params.push(("type".to_string(), kind.to_string()));
        }
        if let Some(since) = self.since {
            params.push(("since".to_string(), since.to_string()));
        }
        if let Some(until) = self.until {
            params.push(("until".to_string(), until.to_string()));
        }
    }
}

/// Paging fields echoed by every history endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    #[serde(default, deserialize_with = "null_as_default")]
    pub count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub limit: u64,
    /// Id-mode responses may send `null` here.
    #[serde(default, deserialize_with = "null_as_default")]
    pub offset: u64,
    #[serde(default)]
    pub next_offset: Option<u64>,
    #[serde(default)]
    pub after_id: Option<i64>,
    #[serde(default)]
    pub next_after_id: Option<i64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPage<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    mode: CursorMode,
    limit: u32,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::new(i64::from(DEFAULT_PAGE_LIMIT))
    }
}

pub fn clamp_limit(limit: i64, max: u32) -> u32 {
    limit.clamp(1, i64::from(max)) as u32
}

impl PageCursor {
    pub fn new(limit: i64) -> Self {
        Self {
            mode: CursorMode::Offset { offset: 0 },
            limit: clamp_limit(limit, MAX_PAGE_LIMIT),
        }
    }

    pub fn after_id(limit: i64) -> Self {
        Self {
            mode: CursorMode::AfterId { after_id: None },
            limit: clamp_limit(limit, MAX_PAGE_LIMIT),
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.set_offset(offset);
        self
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn set_limit(&mut self, limit: i64) {
        self.limit = clamp_limit(limit, MAX_PAGE_LIMIT);
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.mode = CursorMode::Offset { offset };
    }

    /// Switches to id mode; any offset held so far is discarded.
    pub fn set_after_id(&mut self, after_id: i64) {
        self.mode = CursorMode::AfterId {
            after_id: Some(after_id),
        };
    }

    pub fn reset(&mut self) {
        self.mode = match self.mode {
            CursorMode::Offset { .. } => CursorMode::Offset { offset: 0 },
            CursorMode::AfterId { .. } => CursorMode::AfterId { after_id: None },
        };
    }

    pub fn build_query(&self, filters: &HistoryFilters) -> Vec<(String, String)> {
        self.query_with_limit(filters, self.limit)
    }

    pub fn export_query(
        &self,
        filters: &HistoryFilters,
        format: ExportFormat,
        limit: i64,
    ) -> Vec<(String, String)> {
        let mut params = self.query_with_limit(filters, clamp_limit(limit, MAX_EXPORT_LIMIT));
        params.push(("format".to_string(), format.as_str().to_string()));
        params
    }

    fn query_with_limit(&self, filters: &HistoryFilters, limit: u32) -> Vec<(String, String)> {
        let mut params = vec![("limit".to_string(), limit.to_string())];
        match self.mode {
            CursorMode::AfterId {
                after_id: Some(after_id),
            } => params.push(("after_id".to_string(), after_id.to_string())),
            CursorMode::AfterId { after_id: None } => {}
            CursorMode::Offset { offset } if offset > 0 => {
                params.push(("offset".to_string(), offset.to_string()))
            }
            CursorMode::Offset { .. } => {}
        }
        filters.append_to(&mut params);
        params
    }

    pub fn can_advance(&self, meta: &PageMeta, direction: Direction) -> bool {
        match (direction, self.mode) {
            (Direction::Next, CursorMode::AfterId { .. }) => meta.next_after_id.is_some(),
            (Direction::Next, CursorMode::Offset { .. }) => meta.next_offset.is_some(),
            (Direction::Prev, CursorMode::Offset { offset }) => offset > 0,
            (Direction::Prev, CursorMode::AfterId { .. }) => false,
        }
    }

    /// Returns the cursor unchanged when the move is not available.
    pub fn advance(&self, meta: &PageMeta, direction: Direction) -> PageCursor {
        if !self.can_advance(meta, direction) {
            return *self;
        }
        let mode = match (direction, self.mode) {
            (Direction::Next, CursorMode::AfterId { .. }) => CursorMode::AfterId {
                after_id: meta.next_after_id,
            },
            (Direction::Next, CursorMode::Offset { offset }) => CursorMode::Offset {
                offset: meta.next_offset.unwrap_or(offset),
            },
            (Direction::Prev, CursorMode::Offset { offset }) => CursorMode::Offset {
                offset: offset.saturating_sub(u64::from(self.limit)),
            },
            (Direction::Prev, mode @ CursorMode::AfterId { .. }) => mode,
        };
        PageCursor {
            mode,
            limit: self.limit,
        }
    }
}

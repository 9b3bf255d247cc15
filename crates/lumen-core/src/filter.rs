use crate::frame::ServerEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Per-consumer view of the channel. An empty set matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    #[serde(default)]
    pub type_filter: BTreeSet<String>,
    #[serde(default)]
    pub kind_filter: BTreeSet<String>,
}

impl Subscription {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_filter: types.into_iter().map(Into::into).collect(),
            kind_filter: BTreeSet::new(),
        }
    }

    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kind_filter = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, event: &ServerEvent) -> bool {
        if !self.type_filter.is_empty() && !self.type_filter.contains(&event.event_type) {
            return false;
        }
        if self.kind_filter.is_empty() {
            return true;
        }
        match event_kind(&event.payload) {
            Some(kind) => self.kind_filter.contains(&kind),
            None => false,
        }
    }
}

/// Reads `payload.event`; payloads that are still JSON text are decoded first.
/// Anything undecodable yields `None`.
pub fn event_kind(payload: &Value) -> Option<String> {
    match payload {
        Value::Object(map) => map.get("event")?.as_str().map(str::to_string),
        Value::String(raw) => {
            let decoded: Value = serde_json::from_str(raw).ok()?;
            decoded.get("event")?.as_str().map(str::to_string)
        }
        _ => None,
    }
}

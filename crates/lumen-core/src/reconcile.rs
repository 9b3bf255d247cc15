use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub trait Keyed {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListFrame<T> {
    Snapshot { items: Vec<T> },
    Delta { item: T },
    Remove { id: String },
}

/// Latest known record per id. Snapshots replace, deltas upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedCollection<T> {
    items: HashMap<String, T>,
}

impl<T> Default for KeyedCollection<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<T: Keyed> KeyedCollection<T> {
    pub fn from_items(items: Vec<T>) -> Self {
        let mut collection = Self::default();
        collection.apply_frame(ListFrame::Snapshot { items });
        collection
    }

    pub fn apply_frame(&mut self, frame: ListFrame<T>) {
        match frame {
            ListFrame::Snapshot { items } => {
                self.items = items
                    .into_iter()
                    .map(|item| (item.key().to_string(), item))
                    .collect();
            }
            ListFrame::Delta { item } => {
                self.items.insert(item.key().to_string(), item);
            }
            ListFrame::Remove { id } => {
                self.items.remove(&id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Decodes the payload of a list stream frame. Unknown kinds or items that
/// fail to deserialize yield `None` and the frame is dropped.
pub fn decode_list_frame<T: DeserializeOwned>(payload: &Value) -> Option<ListFrame<T>> {
    let decoded;
    let payload = match payload {
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw).ok()?;
            &decoded
        }
        other => other,
    };
    let map = payload.as_object()?;
    let kind = map.get("kind").and_then(Value::as_str)?;
    match kind {
        "snapshot" => {
            let items = map
                .get("items")
                .or_else(|| map.get("data"))
                .or_else(|| map.get("jobs"))?;
            let items = serde_json::from_value::<Vec<T>>(items.clone()).ok()?;
            Some(ListFrame::Snapshot { items })
        }
        "message" | "delta" => {
            // A top-level id marks a flat delta; its `data` is a job field.
            let item = match map.get("item") {
                Some(item) => item.clone(),
                None if map.contains_key("id") => Value::Object(without_kind(map)),
                None => match map.get("data") {
                    Some(data) => data.clone(),
                    None => Value::Object(without_kind(map)),
                },
            };
            let item = serde_json::from_value::<T>(item).ok()?;
            Some(ListFrame::Delta { item })
        }
        "removed" | "remove" => {
            let id = map
                .get("id")
                .and_then(id_as_string)
                .or_else(|| map.get("item")?.get("id").and_then(id_as_string))?;
            Some(ListFrame::Remove { id })
        }
        _ => None,
    }
}

fn without_kind(map: &Map<String, Value>) -> Map<String, Value> {
    let mut item = map.clone();
    item.remove("kind");
    item
}

fn id_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub created_at: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<f64>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl Keyed for Job {
    fn key(&self) -> &str {
        &self.id
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    id_as_string(&val).ok_or_else(|| serde::de::Error::custom("expected string or number for id"))
}

pub fn reconcile_jobs(state: &mut KeyedCollection<Job>, frame: ListFrame<Job>) {
    state.apply_frame(frame);
}

/// Newest first; jobs without a creation time sink to the bottom, ties by id.
pub fn jobs_newest_first(state: &KeyedCollection<Job>) -> Vec<&Job> {
    let mut jobs: Vec<&Job> = state.values().collect();
    jobs.sort_by(|a, b| {
        let a_created = a.created_at.unwrap_or(f64::NEG_INFINITY);
        let b_created = b.created_at.unwrap_or(f64::NEG_INFINITY);
        b_created
            .total_cmp(&a_created)
            .then_with(|| a.id.cmp(&b.id))
    });
    jobs
}

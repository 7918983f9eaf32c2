use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ViewItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: i64,
    pub path: String,
}

impl ViewItem {
    pub fn new(kind: impl Into<String>, id: i64, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id,
            path: path.into(),
        }
    }

    /// Dedup identity inside one flush window.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.id, self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewBatch {
    pub items: Vec<ViewItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub items: usize,
    pub delivered: bool,
    pub flushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub search_query: String,
    pub filters: BTreeMap<String, String>,
    pub current_page: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            search_query: String::new(),
            filters: BTreeMap::new(),
            current_page: 1,
        }
    }
}

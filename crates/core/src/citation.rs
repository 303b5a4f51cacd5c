//! Citation records.

use serde::{Deserialize, Serialize};

/// Links one retrieval turn to a source it surfaced.
///
/// Citations are append-only for the life of a conversation. All citations
/// recorded for the same retrieval share a `turn_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_name: String,
    pub url: String,
    pub turn_index: u64,
    #[serde(default)]
    pub similarity: Option<f64>,
}

impl Citation {
    /// Identity key used to group citations of the same source.
    pub fn key(&self) -> String {
        identity_key(&self.source_name, &self.url)
    }
}

/// `name \0 url`, the grouping key for a source.
pub fn identity_key(source_name: &str, url: &str) -> String {
    format!("{source_name}\0{url}")
}

//! RetrievalClient trait — the abstraction over the RAG server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A retrieval request against one or more document collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// The user's message
    pub prompt: String,

    /// Collections to search
    pub collections: Vec<String>,

    /// Minimum similarity; filtering happens server-side
    pub threshold: f64,

    /// Prior dialogue as `User: …` / `Assistant: …` lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

/// One scored snippet returned by the retrieval server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    #[serde(default)]
    pub text: String,

    #[serde(default, alias = "sourceName", alias = "source")]
    pub source_name: Option<String>,

    #[serde(default, alias = "sourceUrl")]
    pub source_url: Option<String>,

    #[serde(default)]
    pub similarity: Option<f64>,

    /// Collection the snippet came from, when the server reports it
    #[serde(default)]
    pub group: Option<String>,
}

#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Base URL this client talks to. Relative source URLs resolve against it.
    fn base_url(&self) -> &str;

    /// Names of the collections the server offers.
    async fn collections(&self) -> std::result::Result<Vec<String>, RetrievalError>;

    /// Run a query and return the hits the server kept.
    async fn query(
        &self,
        query: RetrievalQuery,
    ) -> std::result::Result<Vec<RetrievalHit>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_accepts_camel_case_source_fields() {
        let hit: RetrievalHit = serde_json::from_str(
            r#"{"text":"t","sourceName":"Handbook.pdf","sourceUrl":"/docs/h","similarity":0.8}"#,
        )
        .unwrap();
        assert_eq!(hit.source_name.as_deref(), Some("Handbook.pdf"));
        assert_eq!(hit.source_url.as_deref(), Some("/docs/h"));
    }

    #[test]
    fn hit_accepts_bare_source_field() {
        let hit: RetrievalHit = serde_json::from_str(r#"{"text":"t","source":"notes.md"}"#).unwrap();
        assert_eq!(hit.source_name.as_deref(), Some("notes.md"));
        assert!(hit.similarity.is_none());
    }

    #[test]
    fn query_omits_empty_history() {
        let q = RetrievalQuery {
            prompt: "p".into(),
            collections: vec!["c".into()],
            threshold: 0.6,
            history: None,
        };
        let json = serde_json::to_string(&q).unwrap();
        assert!(!json.contains("history"));
    }
}

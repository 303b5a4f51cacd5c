//! ModelClient trait — the abstraction over the language-model server.
//!
//! A ModelClient knows how to list models, fetch a model's metadata, and
//! generate text either as a single response or as a stream of fragments.
//!
//! Implementations: Ollama over HTTP, and mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ModelError;

/// One entry from the model server's model listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Metadata returned by the model server's `show` operation.
///
/// Only the fields that can carry a context length are typed; values are
/// kept loose because servers disagree on whether numbers arrive as numbers
/// or strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<serde_json::Value>,

    #[serde(default)]
    pub model_info: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelfile: Option<String>,
}

/// A generation request. Whether it streams is decided by the method called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
        }
    }
}

/// A single fragment of a streamed generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    /// Incremental text, if this fragment carries any
    #[serde(default)]
    pub response: Option<String>,

    /// Whether the server has finished generating
    #[serde(default)]
    pub done: bool,
}

/// The core ModelClient trait.
///
/// The conversation controller calls these without knowing which server or
/// transport sits behind them.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Base URL this client talks to.
    fn base_url(&self) -> &str;

    /// List the models the server can run.
    async fn tags(&self) -> std::result::Result<Vec<ModelSummary>, ModelError>;

    /// Fetch metadata for a model. Fails when the model is unknown or the
    /// server is unreachable.
    async fn show(&self, model: &str) -> std::result::Result<ModelDetails, ModelError>;

    /// Generate a complete response in one request.
    async fn generate(&self, request: GenerateRequest) -> std::result::Result<String, ModelError>;

    /// Generate a response as a stream of fragments.
    ///
    /// The receiver yields fragments until the server reports `done` or the
    /// body ends. Default implementation calls `generate()` and wraps the
    /// result as a single final fragment.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<mpsc::Receiver<std::result::Result<GenerateChunk, ModelError>>, ModelError>
    {
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(GenerateChunk {
                response: Some(response),
                done: true,
            }))
            .await;
        Ok(rx)
    }
}

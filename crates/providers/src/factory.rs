//! HTTP-backed [`BackendFactory`].

use std::sync::Arc;
use std::time::Duration;

use lectern_core::backend::BackendFactory;
use lectern_core::model::ModelClient;
use lectern_core::retrieval::RetrievalClient;
use tracing::warn;

use crate::ollama::{OllamaClient, connect_only_client};
use crate::rag::HttpRetrievalClient;

/// Builds Ollama and RAG clients that share connection pools.
pub struct HttpBackends {
    model_http: reqwest::Client,
    model_timeout: Duration,
    rag_http: reqwest::Client,
}

impl HttpBackends {
    pub fn new(model_timeout: Duration, rag_timeout: Duration) -> Self {
        Self {
            model_http: connect_only_client(model_timeout),
            model_timeout,
            rag_http: build_client(rag_timeout),
        }
    }

    /// Build from the `[model]` and `[rag]` sections of the app config.
    pub fn from_timeouts(model_timeout_secs: u64, rag_timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(model_timeout_secs),
            Duration::from_secs(rag_timeout_secs),
        )
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

impl BackendFactory for HttpBackends {
    fn model_client(&self, base_url: &str) -> Arc<dyn ModelClient> {
        Arc::new(OllamaClient::with_client(
            self.model_http.clone(),
            base_url,
            self.model_timeout,
        ))
    }

    fn retrieval_client(&self, base_url: &str) -> Arc<dyn RetrievalClient> {
        Arc::new(HttpRetrievalClient::with_client(self.rag_http.clone(), base_url))
    }
}

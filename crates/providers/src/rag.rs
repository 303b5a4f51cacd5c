//! HTTP client for the retrieval (RAG) server.
//!
//! Endpoints: `GET /rags` lists collections, `POST /query` searches them.

use async_trait::async_trait;
use lectern_core::error::RetrievalError;
use lectern_core::retrieval::{RetrievalClient, RetrievalHit, RetrievalQuery};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpRetrievalClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn ensure_configured(&self) -> Result<(), RetrievalError> {
        if self.base_url.is_empty() {
            return Err(RetrievalError::NotConfigured("no RAG server URL set".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn collections(&self) -> Result<Vec<String>, RetrievalError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(format!("{}/rags", self.base_url))
            .send()
            .await
            .map_err(|e| RetrievalError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let body: ApiCollectionsResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
        Ok(body.collections)
    }

    async fn query(&self, query: RetrievalQuery) -> Result<Vec<RetrievalHit>, RetrievalError> {
        self.ensure_configured()?;
        let body = ApiQueryRequest {
            prompt: &query.prompt,
            group: &query.collections,
            threshold: query.threshold,
            limit_chunk_role: true,
            history: query.history.as_deref().filter(|h| !h.is_empty()),
        };

        debug!(
            collections = ?query.collections,
            threshold = query.threshold,
            with_history = body.history.is_some(),
            "Sending retrieval query"
        );

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let body: ApiQueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        debug!(hits = body.results.len(), "Retrieval query returned");
        Ok(body.results)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    warn!(status, body = %message, "Retrieval server returned error");
    Err(RetrievalError::ApiError {
        status_code: status,
        message,
    })
}

// --- RAG server API types (internal) ---

#[derive(Serialize)]
struct ApiQueryRequest<'a> {
    prompt: &'a str,
    group: &'a [String],
    threshold: f64,
    limit_chunk_role: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    history: Option<&'a str>,
}

#[derive(Deserialize)]
struct ApiQueryResponse {
    #[serde(default)]
    results: Vec<RetrievalHit>,
}

#[derive(Deserialize)]
struct ApiCollectionsResponse {
    #[serde(default)]
    collections: Vec<String>,
}

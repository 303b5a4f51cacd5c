//! Ollama model server client.
//!
//! Speaks the native Ollama API:
//! - `GET /api/tags` for model discovery
//! - `POST /api/show` for model metadata
//! - `POST /api/generate` for completions, single-shot or NDJSON streaming

use async_trait::async_trait;
use futures::StreamExt;
use lectern_core::error::ModelError;
use lectern_core::model::{GenerateChunk, GenerateRequest, ModelClient, ModelDetails, ModelSummary};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::ndjson::NdjsonDecoder;

/// Client for one Ollama server.
///
/// `timeout` bounds tags, show and single-shot generate. A streaming
/// generate runs until the server finishes or the receiver is dropped.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client with its own connection pool.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(connect_only_client(timeout), base_url, timeout)
    }

    /// Create a client sharing an existing connection pool.
    ///
    /// The pool must not carry a total request timeout of its own, or
    /// long streamed replies get cut off.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            client,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_configured(&self) -> Result<(), ModelError> {
        if self.base_url.is_empty() {
            return Err(ModelError::NotConfigured("no model server URL set".into()));
        }
        Ok(())
    }

    async fn post_generate(
        &self,
        request: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        self.ensure_configured()?;
        let body = ApiGenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream,
        };

        debug!(
            model = %request.model,
            prompt_chars = request.prompt.len(),
            stream,
            "Sending generate request"
        );

        let mut builder = self.client.post(self.url("/api/generate")).json(&body);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder.send().await.map_err(map_transport_error)?;

        check_status(response, &request.model).await
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn tags(&self) -> Result<Vec<ModelSummary>, ModelError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response, "").await?;

        let body: ApiTagsResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse tags: {e}")))?;

        debug!(count = body.models.len(), "Listed models");
        Ok(body.models)
    }

    async fn show(&self, model: &str) -> Result<ModelDetails, ModelError> {
        self.ensure_configured()?;
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&serde_json::json!({ "name": model }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response, model).await?;

        response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse show: {e}")))
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        let response = self.post_generate(&request, false).await?;
        let body: ApiGenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse generate: {e}")))?;
        Ok(body.response.unwrap_or_default())
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<GenerateChunk, ModelError>>, ModelError> {
        let response = self.post_generate(&request, true).await?;
        let (tx, rx) = mpsc::channel(64);
        let model = request.model;

        // Spawn task to read the NDJSON byte stream and forward chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = NdjsonDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ModelError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in decoder.push(&bytes) {
                    let done = chunk.done;
                    if !forward(&tx, chunk).await {
                        trace!(model = %model, "Stream receiver dropped");
                        return;
                    }
                    if done {
                        return;
                    }
                }
            }

            if let Some(chunk) = decoder.finish() {
                let _ = forward(&tx, chunk).await;
            }
        });

        Ok(rx)
    }
}

/// A pooled client bounded only while connecting. Per-request deadlines
/// are set on the request builder.
pub(crate) fn connect_only_client(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Send a chunk unless it carries nothing. Returns false once the receiver
/// is gone.
async fn forward(tx: &mpsc::Sender<Result<GenerateChunk, ModelError>>, chunk: GenerateChunk) -> bool {
    let has_text = chunk.response.as_deref().is_some_and(|r| !r.is_empty());
    if !has_text && !chunk.done {
        return true;
    }
    tx.send(Ok(chunk)).await.is_ok()
}

fn map_transport_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout(e.to_string())
    } else {
        ModelError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response, model: &str) -> Result<reqwest::Response, ModelError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    warn!(status, body = %message, "Model server returned error");

    if status == 404 && !model.is_empty() {
        return Err(ModelError::ModelNotFound(model.to_string()));
    }
    Err(ModelError::ApiError {
        status_code: status,
        message,
    })
}

/// Ollama reports failures as `{"error": "..."}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string())
}

// --- Ollama API types (internal) ---

#[derive(Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
struct ApiTagsResponse {
    #[serde(default)]
    models: Vec<ModelSummary>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::{get, post};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(url: &str) -> OllamaClient {
        OllamaClient::new(url, Duration::from_secs(5))
    }

    #[test]
    fn base_url_is_trimmed() {
        let c = OllamaClient::new(" http://localhost:11434/ ", Duration::from_secs(1));
        assert_eq!(c.base_url(), "http://localhost:11434");
    }

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"model not loaded"}"#), "model not loaded");
        assert_eq!(error_message(" bad gateway "), "bad gateway");
    }

    #[tokio::test]
    async fn empty_url_is_not_configured() {
        let err = client("").tags().await.unwrap_err();
        assert!(matches!(err, ModelError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn tags_lists_models() {
        let url = serve(Router::new().route(
            "/api/tags",
            get(|| async {
                Json(serde_json::json!({
                    "models": [{"name": "llama3:8b", "size": 4661224676u64}, {"name": "qwen2:7b"}]
                }))
            }),
        ))
        .await;

        let models = client(&url).tags().await.unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama3:8b", "qwen2:7b"]);
    }

    #[tokio::test]
    async fn show_sends_model_name_and_parses_metadata() {
        let url = serve(Router::new().route(
            "/api/show",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["name"], "llama3");
                Json(serde_json::json!({
                    "model_info": {"llama.context_length": 8192},
                    "parameters": "num_ctx 4096"
                }))
            }),
        ))
        .await;

        let details = client(&url).show("llama3").await.unwrap();
        assert_eq!(details.model_info["llama.context_length"], 8192);
        assert_eq!(details.parameters.as_deref(), Some("num_ctx 4096"));
    }

    #[tokio::test]
    async fn show_unknown_model_is_not_found() {
        let url = serve(Router::new().route(
            "/api/show",
            post(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": "model 'nope' not found"})),
                )
            }),
        ))
        .await;

        let err = client(&url).show("nope").await.unwrap_err();
        assert!(matches!(err, ModelError::ModelNotFound(ref m) if m == "nope"));
    }

    #[tokio::test]
    async fn generate_returns_response_text() {
        let url = serve(Router::new().route(
            "/api/generate",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], false);
                Json(serde_json::json!({"response": "A summary.", "done": true}))
            }),
        ))
        .await;

        let text = client(&url)
            .generate(GenerateRequest::new("llama3", "Summarize"))
            .await
            .unwrap();
        assert_eq!(text, "A summary.");
    }

    #[tokio::test]
    async fn generate_server_error_is_api_error() {
        let url = serve(Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;

        let err = client(&url)
            .generate(GenerateRequest::new("llama3", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::ApiError { status_code: 500, .. }));
    }

    #[tokio::test]
    async fn stream_yields_fragments_and_skips_garbage() {
        let url = serve(Router::new().route(
            "/api/generate",
            post(|| async {
                "{\"response\":\"Hel\",\"done\":false}\n\
                 garbage line\n\
                 {\"response\":\"lo\",\"done\":false}\n\
                 {\"response\":\"\",\"done\":true}\n"
            }),
        ))
        .await;

        let mut rx = client(&url)
            .generate_stream(GenerateRequest::new("llama3", "hi"))
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            text.push_str(chunk.response.as_deref().unwrap_or(""));
            saw_done |= chunk.done;
        }
        assert_eq!(text, "Hello");
        assert!(saw_done);
    }

    #[tokio::test]
    async fn slow_stream_outlives_request_timeout() {
        let url = serve(Router::new().route(
            "/api/generate",
            post(|| async {
                let lines = futures::stream::iter(0..4).then(|i| async move {
                    if i > 0 {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                    }
                    Ok::<_, std::convert::Infallible>(format!(
                        "{{\"response\":\"p{i}\",\"done\":false}}\n"
                    ))
                });
                axum::body::Body::from_stream(lines)
            }),
        ))
        .await;

        let slow = OllamaClient::new(&url, Duration::from_millis(500));
        let mut rx = slow
            .generate_stream(GenerateRequest::new("llama3", "hi"))
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(chunk.unwrap().response.as_deref().unwrap_or(""));
        }
        assert_eq!(text, "p0p1p2p3");
    }

    #[tokio::test]
    async fn single_shot_generate_honors_timeout() {
        let url = serve(Router::new().route(
            "/api/generate",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(serde_json::json!({"response": "late"}))
            }),
        ))
        .await;

        let err = OllamaClient::new(&url, Duration::from_millis(100))
            .generate(GenerateRequest::new("llama3", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}")).tags().await.unwrap_err();
        assert!(matches!(err, ModelError::Network(_)));
    }
}

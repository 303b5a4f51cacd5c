//! Shared test helpers: scripted model and retrieval servers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lectern_core::backend::BackendFactory;
use lectern_core::error::{ModelError, RetrievalError};
use lectern_core::model::{GenerateChunk, GenerateRequest, ModelClient, ModelDetails, ModelSummary};
use lectern_core::retrieval::{RetrievalClient, RetrievalHit, RetrievalQuery};
use tokio::sync::mpsc;

/// A model server whose answers are set up front.
///
/// `generate` pops scripted results in order and falls back to `"summary"`.
/// `generate_stream` replays `stream_fragments` (or `stream_error`).
pub struct MockModelClient {
    pub models: Mutex<Vec<ModelSummary>>,
    pub details: Mutex<Result<ModelDetails, ModelError>>,
    pub generate_results: Mutex<VecDeque<Result<String, ModelError>>>,
    pub stream_fragments: Mutex<Vec<String>>,
    pub stream_error: Mutex<Option<ModelError>>,
    pub generate_prompts: Mutex<Vec<String>>,
    pub stream_prompts: Mutex<Vec<String>>,
    pub show_calls: Mutex<usize>,
}

impl MockModelClient {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: Mutex::new(
                models
                    .iter()
                    .map(|m| ModelSummary {
                        name: (*m).into(),
                        size: None,
                        modified_at: None,
                    })
                    .collect(),
            ),
            details: Mutex::new(Ok(ModelDetails::default())),
            generate_results: Mutex::new(VecDeque::new()),
            stream_fragments: Mutex::new(vec!["Hello".into(), " there".into()]),
            stream_error: Mutex::new(None),
            generate_prompts: Mutex::new(Vec::new()),
            stream_prompts: Mutex::new(Vec::new()),
            show_calls: Mutex::new(0),
        }
    }

    pub fn with_context_length(self, n: u64) -> Self {
        *self.details.lock().unwrap() = Ok(ModelDetails {
            context_length: Some(serde_json::json!(n)),
            ..Default::default()
        });
        self
    }

    pub fn fail_show(&self, error: ModelError) {
        *self.details.lock().unwrap() = Err(error);
    }

    pub fn succeed_show(&self) {
        *self.details.lock().unwrap() = Ok(ModelDetails::default());
    }

    pub fn push_generate(&self, result: Result<String, ModelError>) {
        self.generate_results.lock().unwrap().push_back(result);
    }

    pub fn set_stream(&self, fragments: &[&str]) {
        *self.stream_fragments.lock().unwrap() = fragments.iter().map(|f| (*f).into()).collect();
    }

    pub fn generate_prompts(&self) -> Vec<String> {
        self.generate_prompts.lock().unwrap().clone()
    }

    pub fn stream_prompts(&self) -> Vec<String> {
        self.stream_prompts.lock().unwrap().clone()
    }

    pub fn show_calls(&self) -> usize {
        *self.show_calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn base_url(&self) -> &str {
        "http://mock-ollama"
    }

    async fn tags(&self) -> Result<Vec<ModelSummary>, ModelError> {
        if let Err(e) = &*self.details.lock().unwrap() {
            return Err(e.clone());
        }
        Ok(self.models.lock().unwrap().clone())
    }

    async fn show(&self, _model: &str) -> Result<ModelDetails, ModelError> {
        *self.show_calls.lock().unwrap() += 1;
        self.details.lock().unwrap().clone()
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        self.generate_prompts.lock().unwrap().push(request.prompt);
        self.generate_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("summary".into()))
    }

    async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<mpsc::Receiver<Result<GenerateChunk, ModelError>>, ModelError> {
        self.stream_prompts.lock().unwrap().push(request.prompt);
        if let Some(e) = self.stream_error.lock().unwrap().clone() {
            return Err(e);
        }
        let fragments = self.stream_fragments.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(fragments.len() + 1);
        for fragment in fragments {
            let _ = tx.try_send(Ok(GenerateChunk {
                response: Some(fragment),
                done: false,
            }));
        }
        let _ = tx.try_send(Ok(GenerateChunk {
            response: None,
            done: true,
        }));
        Ok(rx)
    }
}

/// A retrieval server returning a fixed result.
pub struct MockRetrievalClient {
    pub collections: Mutex<Vec<String>>,
    pub result: Mutex<Result<Vec<RetrievalHit>, RetrievalError>>,
    pub queries: Mutex<Vec<RetrievalQuery>>,
}

impl MockRetrievalClient {
    pub fn new(collections: &[&str]) -> Self {
        Self {
            collections: Mutex::new(collections.iter().map(|c| (*c).into()).collect()),
            result: Mutex::new(Ok(Vec::new())),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_hits(&self, hits: Vec<RetrievalHit>) {
        *self.result.lock().unwrap() = Ok(hits);
    }

    pub fn fail(&self, error: RetrievalError) {
        *self.result.lock().unwrap() = Err(error);
    }

    pub fn queries(&self) -> Vec<RetrievalQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalClient for MockRetrievalClient {
    fn base_url(&self) -> &str {
        "http://mock-rag:9042"
    }

    async fn collections(&self) -> Result<Vec<String>, RetrievalError> {
        Ok(self.collections.lock().unwrap().clone())
    }

    async fn query(&self, query: RetrievalQuery) -> Result<Vec<RetrievalHit>, RetrievalError> {
        self.queries.lock().unwrap().push(query);
        self.result.lock().unwrap().clone()
    }
}

/// Hands out the same two mocks for every URL.
pub struct MockBackends {
    pub model: Arc<MockModelClient>,
    pub rag: Arc<MockRetrievalClient>,
    pub model_urls: Mutex<Vec<String>>,
}

impl MockBackends {
    pub fn new(model: MockModelClient, rag: MockRetrievalClient) -> Self {
        Self {
            model: Arc::new(model),
            rag: Arc::new(rag),
            model_urls: Mutex::new(Vec::new()),
        }
    }
}

impl BackendFactory for MockBackends {
    fn model_client(&self, base_url: &str) -> Arc<dyn ModelClient> {
        self.model_urls.lock().unwrap().push(base_url.to_string());
        self.model.clone()
    }

    fn retrieval_client(&self, _base_url: &str) -> Arc<dyn RetrievalClient> {
        self.rag.clone()
    }
}

/// A hit with a name, a relative source URL, and a similarity.
pub fn hit(text: &str, name: &str, similarity: f64) -> RetrievalHit {
    RetrievalHit {
        text: text.into(),
        source_name: Some(name.into()),
        source_url: Some(format!("/docs/{name}")),
        similarity: Some(similarity),
        group: None,
    }
}

//! The conversation controller.
//!
//! One controller per user session. It owns the transcript, the citation
//! ledger, the connection state and its monitor, and runs each send through
//! the pipeline:
//!
//! ```text
//! user text → retrieval (optional) → citation ledger → budget check
//!           → prompt assembly → streamed generation → transcript
//! ```
//!
//! Sends are serialized: a second send while one is streaming is refused
//! with [`ConversationError::Busy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lectern_config::AppConfig;
use lectern_core::backend::BackendFactory;
use lectern_core::citation::Citation;
use lectern_core::error::{ConversationError, ModelError, RetrievalError};
use lectern_core::message::{Transcript, Turn};
use lectern_core::model::{GenerateRequest, ModelClient};
use lectern_core::retrieval::RetrievalQuery;
use lectern_core::settings::{ChatSettings, SettingsPatch, UserProfile};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::budget::HistoryBudgetManager;
use crate::citations::{CitationCandidate, CitationLedger, CitationView};
use crate::context_window::{self, ContextWindowCache};
use crate::monitor::{ConnectionState, FeatureAvailability, MonitorHandle, spawn_monitor};
use crate::prompt::{self, PromptInput};
use crate::retrieval::{self, RetrievalPolicy};
use crate::stream_event::{ChatStreamEvent, SendOutcome};

const EVENT_BUFFER: usize = 64;

/// Transcript and citations, mutated together.
#[derive(Debug, Default)]
struct ConversationState {
    transcript: Transcript,
    citations: CitationLedger,
}

/// Holds the "waiting for a reply" flag for the duration of a send.
struct SendGuard {
    flag: Arc<AtomicBool>,
}

impl SendGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, ConversationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConversationError::Busy)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Orchestrates one user's conversation.
pub struct ConversationController {
    backends: Arc<dyn BackendFactory>,
    budget: HistoryBudgetManager,
    policy: RetrievalPolicy,
    append_related_resources: bool,
    check_timeout: Duration,
    monitor_interval: Duration,
    settings: RwLock<ChatSettings>,
    state: RwLock<ConversationState>,
    connection: Arc<RwLock<ConnectionState>>,
    collections: RwLock<Vec<String>>,
    windows: Mutex<ContextWindowCache>,
    waiting: Arc<AtomicBool>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ConversationController {
    pub fn new(backends: Arc<dyn BackendFactory>, config: &AppConfig, settings: ChatSettings) -> Self {
        Self {
            backends,
            budget: HistoryBudgetManager::from_config(&config.conversation),
            policy: RetrievalPolicy::from_config(&config.conversation, &config.rag),
            append_related_resources: config.conversation.append_related_resources,
            check_timeout: Duration::from_secs(config.model.show_timeout_secs),
            monitor_interval: Duration::from_secs(config.conversation.monitor_interval_secs),
            settings: RwLock::new(settings),
            state: RwLock::new(ConversationState::default()),
            connection: Arc::new(RwLock::new(ConnectionState::default())),
            collections: RwLock::new(Vec::new()),
            windows: Mutex::new(ContextWindowCache::new()),
            waiting: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
        }
    }

    // ── Settings ──────────────────────────────────────────────────────────

    pub async fn settings(&self) -> ChatSettings {
        self.settings.read().await.clone()
    }

    /// Merge a settings patch. Changing a server URL re-checks the connection.
    pub async fn update_settings(&self, patch: SettingsPatch) -> ChatSettings {
        let reconnect = patch.touches_endpoints();
        let updated = {
            let mut settings = self.settings.write().await;
            settings.apply(patch);
            settings.clone()
        };
        if reconnect {
            info!(ollama_url = %updated.ollama_url, "Server URL changed, reconnecting");
            self.windows.lock().await.clear();
            self.check_connection().await;
        }
        updated
    }

    // ── Connection ────────────────────────────────────────────────────────

    pub async fn connection(&self) -> ConnectionState {
        self.connection.read().await.clone()
    }

    pub async fn features(&self) -> FeatureAvailability {
        self.connection.read().await.features()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    fn model_client(&self, url: &str) -> Arc<dyn ModelClient> {
        self.backends.model_client(url)
    }

    /// List models, keep or pick a selection, and start monitoring it.
    ///
    /// Never fails: problems are recorded in the returned state.
    pub async fn check_connection(&self) -> ConnectionState {
        self.stop_monitor().await;
        let url = self.settings.read().await.ollama_url.clone();

        if url.is_empty() {
            let mut conn = self.connection.write().await;
            conn.mark_disconnected("No model server URL configured");
            conn.models.clear();
            return conn.clone();
        }

        let client = self.model_client(&url);
        let listed = match tokio::time::timeout(self.check_timeout, client.tags()).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(format!(
                "no answer from {url} within {}s",
                self.check_timeout.as_secs()
            ))),
        };

        let snapshot = {
            let mut conn = self.connection.write().await;
            match listed {
                Ok(models) => {
                    conn.models = models.into_iter().map(|m| m.name).collect();
                    let keep = conn
                        .selected_model
                        .as_ref()
                        .is_some_and(|m| conn.models.contains(m));
                    if !keep {
                        conn.selected_model = conn.models.first().cloned();
                    }
                    conn.connected = !conn.models.is_empty();
                    conn.error = (!conn.connected).then(|| "No models available".to_string());
                    info!(
                        url = %url,
                        models = conn.models.len(),
                        selected = ?conn.selected_model,
                        "Connected to model server"
                    );
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Model server unreachable");
                    conn.mark_disconnected(e.to_string());
                    conn.models.clear();
                }
            }
            conn.clone()
        };

        if snapshot.is_ready() {
            self.start_monitor(client).await;
        }
        snapshot
    }

    /// Switch to `model` after confirming the server knows it.
    pub async fn select_model(&self, model: &str) -> Result<ConnectionState, ModelError> {
        self.stop_monitor().await;
        let url = self.settings.read().await.ollama_url.clone();
        let client = self.model_client(&url);

        let checked = match tokio::time::timeout(self.check_timeout, client.show(model)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(format!(
                "model check exceeded {}s",
                self.check_timeout.as_secs()
            ))),
        };

        match checked {
            Ok(details) => {
                let window = context_window::resolve(model, Some(&details));
                self.windows.lock().await.insert(model, window);
                let snapshot = {
                    let mut conn = self.connection.write().await;
                    conn.selected_model = Some(model.to_string());
                    conn.connected = true;
                    conn.error = None;
                    conn.clone()
                };
                info!(model = %model, context_window = window, "Model selected");
                self.start_monitor(client).await;
                Ok(snapshot)
            }
            Err(e) => {
                warn!(model = %model, error = %e, "Model check failed");
                self.connection.write().await.mark_disconnected(e.to_string());
                Err(e)
            }
        }
    }

    async fn start_monitor(&self, client: Arc<dyn ModelClient>) {
        let handle = spawn_monitor(
            client,
            self.connection.clone(),
            self.monitor_interval,
            self.check_timeout,
        );
        *self.monitor.lock().await = Some(handle);
    }

    /// Stop the background connection monitor, if running.
    pub async fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.stop();
        }
    }

    pub async fn monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(MonitorHandle::is_running)
    }

    // ── Collections ───────────────────────────────────────────────────────

    /// Fetch the collections the RAG server offers and drop selections it no
    /// longer has.
    pub async fn refresh_collections(&self) -> Result<Vec<String>, RetrievalError> {
        let url = self.settings.read().await.effective_rag_url();
        let available = self.backends.retrieval_client(&url).collections().await?;

        {
            let mut settings = self.settings.write().await;
            let before = settings.rag_collections.len();
            settings.rag_collections.retain(|c| available.contains(c));
            let pruned = before - settings.rag_collections.len();
            if pruned > 0 {
                info!(pruned, "Dropped selected collections the server no longer offers");
            }
        }
        *self.collections.write().await = available.clone();
        debug!(count = available.len(), "Collections refreshed");
        Ok(available)
    }

    pub async fn available_collections(&self) -> Vec<String> {
        self.collections.read().await.clone()
    }

    // ── Conversation ──────────────────────────────────────────────────────

    pub async fn transcript(&self) -> Transcript {
        self.state.read().await.transcript.clone()
    }

    pub async fn citations(&self) -> Vec<Citation> {
        self.state.read().await.citations.citations().to_vec()
    }

    pub async fn citation_view(&self) -> CitationView {
        self.state.read().await.citations.view()
    }

    /// Clear the transcript and citations. Refused while a reply streams.
    pub async fn new_conversation(&self) -> Result<(), ConversationError> {
        let _guard = SendGuard::acquire(&self.waiting)?;
        let mut state = self.state.write().await;
        state.transcript.clear();
        state.citations.clear();
        info!("Started a new conversation");
        Ok(())
    }

    /// Validate the intro and profile, then send the intro as the first message.
    pub async fn send_intro(
        self: Arc<Self>,
        intro: String,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ConversationError> {
        let profile = self.settings.read().await.profile.clone();
        validate_intro(&intro, &profile)?;
        self.send_stream(intro).await
    }

    /// Send a message and wait for the reply to finish.
    pub async fn send(self: Arc<Self>, text: impl Into<String>) -> Result<SendOutcome, ConversationError> {
        let mut rx = self.clone().send_stream(text.into()).await?;
        let mut error = None;
        while let Some(event) = rx.recv().await {
            if let ChatStreamEvent::Error { message } = event {
                error = Some(message);
            }
        }
        let state = self.state.read().await;
        let reply = state
            .transcript
            .last()
            .filter(|t| !t.is_user())
            .cloned();
        Ok(SendOutcome {
            reply,
            turns: state.transcript.len(),
            citations: state.citations.citations().len(),
            error,
        })
    }

    /// Start a send and return its event stream.
    ///
    /// Refusals (`EmptyMessage`, `NotReady`, `Busy`) are returned before
    /// anything is touched. Once accepted, the send runs to completion in the
    /// background and reports through the returned receiver.
    pub async fn send_stream(
        self: Arc<Self>,
        text: String,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>, ConversationError> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        if self.settings.read().await.ollama_url.is_empty() {
            return Err(ConversationError::NotReady(
                "no model server URL configured".into(),
            ));
        }
        let Some(model) = self.connection.read().await.selected_model.clone() else {
            return Err(ConversationError::NotReady("no model selected".into()));
        };

        let guard = SendGuard::acquire(&self.waiting)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            self.run_send(text, model, tx).await;
            drop(guard);
        });
        Ok(rx)
    }

    async fn run_send(&self, text: String, model: String, tx: mpsc::Sender<ChatStreamEvent>) {
        let settings = self.settings.read().await.clone();
        let client = self.model_client(&settings.ollama_url);
        info!(model = %model, chars = text.chars().count(), "Sending message");

        let working = {
            let mut state = self.state.write().await;
            state.transcript.push(Turn::user(text.clone()));
            state.transcript.clone()
        };

        let (rag_context, sources) = self.retrieve(&settings, &text, working.before_last(), &tx).await;

        let window = self.context_window(client.as_ref(), &model).await;
        let mut working = working;
        let build = |t: &Transcript| {
            let user_message = t.last().map_or("", |turn| turn.content.as_str());
            prompt::assemble(&PromptInput {
                system_message: &settings.system_message,
                profile: &settings.profile,
                rag_context: rag_context.as_deref(),
                history: t.before_last(),
                user_message,
            })
        };
        let budgeted = self
            .budget
            .enforce(&mut working, window, client.as_ref(), &model, build, Some(&tx))
            .await;

        {
            let mut state = self.state.write().await;
            state.transcript = working;
            state.transcript.push(Turn::assistant(""));
        }

        let failure = self
            .stream_reply(client.as_ref(), GenerateRequest::new(&model, budgeted.prompt), &tx)
            .await;

        let (turns, citations) = {
            let mut state = self.state.write().await;
            let empty = match state.transcript.last_mut() {
                Some(turn) if !turn.is_user() => {
                    turn.content = turn.content.trim_start().to_string();
                    if failure.is_none() && self.append_related_resources {
                        turn.content = prompt::append_related_resources(&turn.content, &sources);
                    }
                    turn.content.is_empty()
                }
                _ => false,
            };
            if empty {
                state.transcript.pop();
            }
            if let Some(message) = &failure {
                state.transcript.push(Turn::assistant(format!("Error: {message}")));
            }
            (state.transcript.len(), state.citations.citations().len())
        };

        let event = match failure {
            Some(message) => {
                warn!(model = %model, error = %message, "Generation failed");
                ChatStreamEvent::Error { message }
            }
            None => {
                info!(model = %model, turns, "Reply complete");
                ChatStreamEvent::Done { turns, citations }
            }
        };
        let _ = tx.send(event).await;
    }

    /// Query the RAG server when the policy allows it and record citations.
    async fn retrieve(
        &self,
        settings: &ChatSettings,
        text: &str,
        history: &[Turn],
        tx: &mpsc::Sender<ChatStreamEvent>,
    ) -> (Option<String>, Vec<(String, String)>) {
        if !self.policy.should_query(settings, text, !history.is_empty()) {
            debug!("Skipping retrieval for this message");
            return (None, Vec::new());
        }

        let rag_url = settings.effective_rag_url();
        let query = RetrievalQuery {
            prompt: text.to_string(),
            collections: settings.rag_collections.clone(),
            threshold: settings.rag_threshold,
            history: retrieval::history_for_query(history),
        };
        let hits = match self.backends.retrieval_client(&rag_url).query(query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(url = %rag_url, error = %e, "Retrieval failed, continuing without context");
                return (None, Vec::new());
            }
        };

        let hits = self.policy.select_hits(hits);
        if hits.is_empty() {
            debug!("Retrieval returned no results");
            return (None, Vec::new());
        }

        let default_collection = match settings.rag_collections.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };
        let candidates = retrieval::citation_candidates(&hits, &rag_url, default_collection);
        let sources = related_sources(&candidates);
        self.record_citations(candidates, tx).await;

        (retrieval::build_context_block(&hits), sources)
    }

    async fn record_citations(&self, candidates: Vec<CitationCandidate>, tx: &mpsc::Sender<ChatStreamEvent>) {
        let recorded = {
            let mut state = self.state.write().await;
            state.citations.record_turn(candidates).map(|turn_index| {
                let sources: Vec<Citation> = state
                    .citations
                    .citations()
                    .iter()
                    .filter(|c| c.turn_index == turn_index)
                    .cloned()
                    .collect();
                (turn_index, sources)
            })
        };
        if let Some((turn_index, sources)) = recorded {
            info!(turn_index, sources = sources.len(), "Citations recorded");
            let _ = tx
                .send(ChatStreamEvent::CitationsRecorded { turn_index, sources })
                .await;
        }
    }

    /// Context window for `model`, resolved once and cached.
    async fn context_window(&self, client: &dyn ModelClient, model: &str) -> usize {
        if let Some(window) = self.windows.lock().await.get(model) {
            return window;
        }
        let details = match tokio::time::timeout(self.check_timeout, client.show(model)).await {
            Ok(Ok(details)) => Some(details),
            Ok(Err(e)) => {
                warn!(model = %model, error = %e, "Could not read model details, using default window");
                None
            }
            Err(_) => {
                warn!(model = %model, "Model details timed out, using default window");
                None
            }
        };
        let window = context_window::resolve(model, details.as_ref());
        debug!(model = %model, window, "Context window resolved");
        self.windows.lock().await.insert(model, window);
        window
    }

    /// Stream the reply into the trailing assistant turn. Returns the error
    /// message if generation failed.
    async fn stream_reply(
        &self,
        client: &dyn ModelClient,
        request: GenerateRequest,
        tx: &mpsc::Sender<ChatStreamEvent>,
    ) -> Option<String> {
        let mut chunks = match client.generate_stream(request).await {
            Ok(rx) => rx,
            Err(e) => return Some(e.to_string()),
        };

        while let Some(chunk) = chunks.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Some(e.to_string()),
            };
            if let Some(fragment) = chunk.response.filter(|f| !f.is_empty()) {
                if let Some(turn) = self.state.write().await.transcript.last_mut() {
                    turn.content.push_str(&fragment);
                }
                if tx.send(ChatStreamEvent::Chunk { content: fragment }).await.is_err() {
                    debug!("Event receiver dropped, ending stream");
                    return None;
                }
            }
            if chunk.done {
                break;
            }
        }
        None
    }
}

/// Fail with every missing field when the intro or any profile field is blank.
pub fn validate_intro(intro: &str, profile: &UserProfile) -> Result<(), ConversationError> {
    let mut missing = Vec::new();
    if intro.trim().is_empty() {
        missing.push("intro".to_string());
    }
    missing.extend(profile.missing_fields());
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConversationError::MissingFields(missing))
    }
}

fn related_sources(candidates: &[CitationCandidate]) -> Vec<(String, String)> {
    candidates
        .iter()
        .filter(|c| c.url != retrieval::UNLINKED_URL)
        .map(|c| (c.source_name.clone(), c.url.clone()))
        .collect()
}

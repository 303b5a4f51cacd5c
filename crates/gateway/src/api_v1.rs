//! HTTP API v1: one conversation session per user id.
//!
//! Endpoints (all under `/v1/users/{user}`):
//!
//! - `GET    /settings`          — Stored settings
//! - `PATCH  /settings`          — Merge a partial update (debounced save)
//! - `GET    /status`            — Connection state and feature availability
//! - `POST   /connection/retry`  — Re-check the model server
//! - `GET    /models`            — Models offered and the selection
//! - `POST   /model`             — Select a model
//! - `GET    /collections`       — Refresh RAG collections
//! - `POST   /chat`              — Send a message, get an SSE stream
//! - `POST   /intro`             — Validate and send the intro, SSE stream
//! - `GET    /transcript`        — Turns so far
//! - `GET    /citations`         — Relevant-resources view
//! - `DELETE /conversation`      — Start a new conversation

use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post},
};
use lectern_conversation::{
    ChatStreamEvent, CitationView, ConnectionState, FeatureAvailability,
};
use lectern_core::error::{ConversationError, ModelError, RetrievalError};
use lectern_core::message::Turn;
use lectern_core::settings::{ChatSettings, SettingsPatch};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::SharedState;

/// Build the v1 API router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/users/{user}/settings",
            get(get_settings_handler).patch(update_settings_handler),
        )
        .route("/users/{user}/status", get(status_handler))
        .route("/users/{user}/connection/retry", post(retry_handler))
        .route("/users/{user}/models", get(list_models_handler))
        .route("/users/{user}/model", post(select_model_handler))
        .route("/users/{user}/collections", get(collections_handler))
        .route("/users/{user}/chat", post(chat_handler))
        .route("/users/{user}/intro", post(intro_handler))
        .route("/users/{user}/transcript", get(transcript_handler))
        .route("/users/{user}/citations", get(citations_handler))
        .route(
            "/users/{user}/conversation",
            axum::routing::delete(new_conversation_handler),
        )
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Names of the fields that failed validation, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            fields: Vec::new(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub connection: ConnectionState,
    pub features: FeatureAvailability,
    pub waiting: bool,
    pub monitoring: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<String>,
    pub selected: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionsResponse {
    pub available: Vec<String>,
    pub selected: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct IntroRequest {
    pub intro: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub turns: Vec<Turn>,
    pub waiting: bool,
}

// ── Error mapping ─────────────────────────────────────────────────────────

fn conversation_error(err: ConversationError) -> ApiError {
    let status = match &err {
        ConversationError::Busy => StatusCode::CONFLICT,
        ConversationError::EmptyMessage => StatusCode::BAD_REQUEST,
        ConversationError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        ConversationError::MissingFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    let fields = match &err {
        ConversationError::MissingFields(fields) => fields.clone(),
        _ => Vec::new(),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            fields,
        }),
    )
}

fn model_error(err: ModelError) -> ApiError {
    let status = match &err {
        ModelError::ModelNotFound(_) | ModelError::ApiError { status_code: 404, .. } => {
            StatusCode::NOT_FOUND
        }
        ModelError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    api_error(status, err.to_string())
}

fn retrieval_error(err: RetrievalError) -> ApiError {
    api_error(StatusCode::BAD_GATEWAY, err.to_string())
}

// ── Settings ──────────────────────────────────────────────────────────────

async fn get_settings_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<ChatSettings> {
    Json(state.session(&user).await.settings().await)
}

async fn update_settings_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Json<ChatSettings> {
    let session = state.session(&user).await;
    if patch.is_empty() {
        return Json(session.settings().await);
    }
    let updated = session.update_settings(patch).await;
    state.settings.save(&user, updated.clone()).await;
    Json(updated)
}

// ── Connection & models ───────────────────────────────────────────────────

async fn status_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<StatusResponse> {
    let session = state.session(&user).await;
    Json(StatusResponse {
        connection: session.connection().await,
        features: session.features().await,
        waiting: session.is_waiting(),
        monitoring: session.monitor_running().await,
    })
}

async fn retry_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<ConnectionState> {
    info!(user = %user, "Connection retry requested");
    Json(state.session(&user).await.check_connection().await)
}

async fn list_models_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<ModelListResponse> {
    let connection = state.session(&user).await.connection().await;
    Json(ModelListResponse {
        models: connection.models,
        selected: connection.selected_model,
    })
}

async fn select_model_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
    Json(payload): Json<SelectModelRequest>,
) -> Result<Json<ConnectionState>, ApiError> {
    let model = payload.model.trim();
    if model.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Model name is empty"));
    }
    state
        .session(&user)
        .await
        .select_model(model)
        .await
        .map(Json)
        .map_err(model_error)
}

async fn collections_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Result<Json<CollectionsResponse>, ApiError> {
    let session = state.session(&user).await;
    let before = session.settings().await;
    let available = session.refresh_collections().await.map_err(|e| {
        warn!(user = %user, error = %e, "Collection refresh failed");
        retrieval_error(e)
    })?;

    let after = session.settings().await;
    if after.rag_collections != before.rag_collections {
        state.settings.save(&user, after.clone()).await;
    }
    Ok(Json(CollectionsResponse {
        available,
        selected: after.rag_collections,
    }))
}

// ── Chat ──────────────────────────────────────────────────────────────────

fn event_stream(
    rx: mpsc::Receiver<ChatStreamEvent>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });
    Sse::new(stream)
}

async fn chat_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(user = %user, "Chat SSE request");
    let rx = state
        .session(&user)
        .await
        .send_stream(payload.message)
        .await
        .map_err(conversation_error)?;
    Ok(event_stream(rx))
}

async fn intro_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
    Json(payload): Json<IntroRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    info!(user = %user, "Intro SSE request");
    let rx = state
        .session(&user)
        .await
        .send_intro(payload.intro)
        .await
        .map_err(conversation_error)?;
    Ok(event_stream(rx))
}

// ── Conversation ──────────────────────────────────────────────────────────

async fn transcript_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<TranscriptResponse> {
    let session = state.session(&user).await;
    Json(TranscriptResponse {
        turns: session.transcript().await.turns().to_vec(),
        waiting: session.is_waiting(),
    })
}

async fn citations_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Json<CitationView> {
    Json(state.session(&user).await.citation_view().await)
}

async fn new_conversation_handler(
    State(state): State<SharedState>,
    Path(user): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .session(&user)
        .await
        .new_conversation()
        .await
        .map_err(conversation_error)?;
    Ok(StatusCode::NO_CONTENT)
}


#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lectern_core::settings::SettingsStore;
    use tower::ServiceExt;

    async fn body_bytes(response: axum::response::Response) -> axum::body::Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn status_reports_connection_and_features() {
        let (state, _) = test_state(&["llama3", "mistral"]);
        let app = v1_router(state);

        let response = app.oneshot(get_request("/users/alice/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(status.connection.connected);
        assert_eq!(status.connection.selected_model.as_deref(), Some("llama3"));
        assert!(status.features.send);
        assert!(!status.waiting);
    }

    #[tokio::test]
    async fn no_models_leaves_features_unavailable() {
        let (state, _) = test_state(&[]);
        let app = v1_router(state);

        let response = app.oneshot(get_request("/users/alice/status")).await.unwrap();
        let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(!status.connection.connected);
        assert!(!status.features.send);
        assert!(!status.features.citations);
    }

    #[tokio::test]
    async fn patch_settings_merges_and_saves() {
        tokio::time::pause();
        let (state, store) = test_state(&["llama3"]);
        let app = v1_router(state.clone());

        let req = json_request(
            "PATCH",
            "/users/alice/settings",
            serde_json::json!({ "theme": "forest", "chatFontSize": 18 }),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let settings: ChatSettings = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(settings.theme, "forest");
        assert_eq!(settings.chat_font_size, 18);
        assert_eq!(settings.rag_collections, vec!["handbook".to_string()]);

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let stored = store.load("alice").await.unwrap().unwrap();
        assert_eq!(stored.theme, "forest");
    }

    #[tokio::test]
    async fn patch_just_before_shutdown_is_flushed() {
        let (state, store) = test_state(&["llama3"]);

        let req = json_request(
            "PATCH",
            "/users/alice/settings",
            serde_json::json!({ "theme": "dark" }),
        );
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.load("alice").await.unwrap().is_none());

        state.settings.flush_pending().await;
        assert_eq!(store.load("alice").await.unwrap().unwrap().theme, "dark");
    }

    #[tokio::test]
    async fn list_and_select_models() {
        let (state, _) = test_state(&["llama3", "mistral"]);

        let response = v1_router(state.clone())
            .oneshot(get_request("/users/alice/models"))
            .await
            .unwrap();
        let list: ModelListResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(list.models, vec!["llama3", "mistral"]);

        let req = json_request("POST", "/users/alice/model", serde_json::json!({ "model": "mistral" }));
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let conn: ConnectionState = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(conn.selected_model.as_deref(), Some("mistral"));
    }

    #[tokio::test]
    async fn selecting_unknown_model_is_not_found() {
        let (state, _) = test_state(&["llama3"]);
        let req = json_request("POST", "/users/alice/model", serde_json::json!({ "model": "nope" }));

        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_reconnects() {
        let (state, _) = test_state(&["llama3"]);
        let req = Request::builder()
            .method("POST")
            .uri("/users/alice/connection/retry")
            .body(Body::empty())
            .unwrap();

        let response = v1_router(state).oneshot(req).await.unwrap();
        let conn: ConnectionState = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn collections_lists_available_and_selected() {
        let (state, _) = test_state(&["llama3"]);

        let response = v1_router(state)
            .oneshot(get_request("/users/alice/collections"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let collections: CollectionsResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(collections.available, vec!["handbook", "standards"]);
        assert_eq!(collections.selected, vec!["handbook"]);
    }

    #[tokio::test]
    async fn chat_streams_events_and_records_citations() {
        let (state, _) = test_state(&["llama3"]);
        let req = json_request(
            "POST",
            "/users/alice/chat",
            serde_json::json!({ "message": "How should I introduce fractions to fourth graders?" }),
        );

        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
        assert!(body.contains("event: citations_recorded"));
        assert!(body.contains("event: chunk"));
        assert!(body.contains("event: done"));

        let response = v1_router(state.clone())
            .oneshot(get_request("/users/alice/transcript"))
            .await
            .unwrap();
        let transcript: TranscriptResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(transcript.turns.len(), 2);
        assert_eq!(transcript.turns[1].content, "Start with a number line.");

        let response = v1_router(state)
            .oneshot(get_request("/users/alice/citations"))
            .await
            .unwrap();
        let view: CitationView = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(view.entries.len(), 2);
        assert_eq!(view.entries[0].source_name, "Handbook.pdf");
        assert_eq!(view.entries[0].url, "http://localhost:9042/docs/Handbook.pdf");
    }

    #[tokio::test]
    async fn empty_chat_message_is_bad_request() {
        let (state, _) = test_state(&["llama3"]);
        let req = json_request("POST", "/users/alice/chat", serde_json::json!({ "message": "   " }));

        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_without_model_is_unavailable() {
        let (state, _) = test_state(&[]);
        let req = json_request("POST", "/users/alice/chat", serde_json::json!({ "message": "Hello there friend" }));

        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(err.error.contains("no model selected"));
    }

    #[tokio::test]
    async fn intro_with_missing_profile_lists_fields() {
        let (state, _) = test_state(&["llama3"]);
        let req = json_request("POST", "/users/alice/intro", serde_json::json!({ "intro": "" }));

        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(!err.fields.is_empty());
    }

    #[tokio::test]
    async fn delete_conversation_clears_transcript() {
        let (state, _) = test_state(&["llama3"]);
        let session = state.session("alice").await;
        let outcome = session.clone().send("Tell me about formative assessment").await.unwrap();
        assert!(outcome.reply.is_some());

        let req = Request::builder()
            .method("DELETE")
            .uri("/users/alice/conversation")
            .body(Body::empty())
            .unwrap();
        let response = v1_router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(session.transcript().await.is_empty());
    }
}

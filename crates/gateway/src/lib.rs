//! HTTP API gateway for Lectern.
//!
//! Exposes a health check and the per-user v1 API: settings, connection
//! status, model and collection selection, streamed chat and the
//! relevant-resources view.
//!
//! Each user id gets its own [`ConversationController`], created on first
//! use from the user's stored settings.

pub mod api_v1;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use lectern_config::AppConfig;
use lectern_conversation::ConversationController;
use lectern_core::backend::BackendFactory;
use lectern_providers::HttpBackends;
use lectern_settings::SettingsService;
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Request bodies are small JSON documents.
const BODY_LIMIT: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub backends: Arc<dyn BackendFactory>,
    pub settings: SettingsService,
    sessions: RwLock<HashMap<String, Arc<ConversationController>>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(config: AppConfig, backends: Arc<dyn BackendFactory>, settings: SettingsService) -> Self {
        Self {
            config,
            backends,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The user's session, created from stored settings on first use.
    ///
    /// A new session checks the model server connection before it is returned.
    pub async fn session(&self, user_id: &str) -> Arc<ConversationController> {
        if let Some(existing) = self.sessions.read().await.get(user_id) {
            return existing.clone();
        }

        let settings = self.settings.load(user_id).await;
        let fresh = Arc::new(ConversationController::new(
            self.backends.clone(),
            &self.config,
            settings,
        ));

        let session = self
            .sessions
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| fresh.clone())
            .clone();

        if Arc::ptr_eq(&session, &fresh) {
            info!(user = %user_id, "Session started");
            session.check_connection().await;
        }
        session
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Build the full router: health check plus the v1 API.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Browsers may call the API only from the gateway's own origin.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let port = config.gateway.port;
    let origins: Vec<HeaderValue> = [
        format!("http://{}:{port}", config.gateway.host),
        format!("http://localhost:{port}"),
    ]
    .iter()
    .filter_map(|origin| HeaderValue::from_str(origin).ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server with HTTP backends and the file settings store.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let backends: Arc<dyn BackendFactory> = Arc::new(HttpBackends::from_timeouts(
        config.model.request_timeout_secs,
        config.rag.request_timeout_secs,
    ));
    let settings = SettingsService::from_config(&config);
    info!(store = settings.store_name(), "Settings store ready");

    let state = Arc::new(GatewayState::new(config, backends, settings));
    let app = build_router(state.clone());

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.settings.flush_pending().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// ── Health ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

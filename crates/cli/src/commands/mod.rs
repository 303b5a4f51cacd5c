pub mod chat;
pub mod models;
pub mod onboard;
pub mod serve;
pub mod status;

use std::sync::Arc;

use lectern_config::AppConfig;
use lectern_conversation::ConversationController;
use lectern_providers::HttpBackends;
use lectern_settings::SettingsService;

/// Settings profile used when none is given.
pub const DEFAULT_USER: &str = "local";

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load().map_err(|e| format!("Failed to load config: {e}").into())
}

/// A conversation for one settings profile, backed by the HTTP servers and
/// the file settings store.
pub struct Session {
    pub user: String,
    pub controller: Arc<ConversationController>,
    pub settings: SettingsService,
}

impl Session {
    /// Load the user's settings and check the model server.
    pub async fn open(config: &AppConfig, user: &str) -> Self {
        let backends = Arc::new(HttpBackends::from_timeouts(
            config.model.request_timeout_secs,
            config.rag.request_timeout_secs,
        ));
        let settings = SettingsService::from_config(config);
        let controller = Arc::new(ConversationController::new(
            backends,
            config,
            settings.load(user).await,
        ));
        controller.check_connection().await;
        Self {
            user: user.to_string(),
            controller,
            settings,
        }
    }
}

//! Per-user settings persistence for Lectern.
//!
//! Backends:
//! - [`FileSettingsStore`]: one `settings.json` file keyed by user id (default)
//! - [`InMemorySettingsStore`]: nothing written to disk
//!
//! [`SettingsService`] layers first-run defaults from the configuration and
//! debounced writes on top of a store.

pub mod debounce;
pub mod file_store;
pub mod in_memory;

pub use debounce::DebouncedWriter;
pub use file_store::FileSettingsStore;
pub use in_memory::InMemorySettingsStore;

use std::sync::Arc;
use std::time::Duration;

use lectern_config::AppConfig;
use lectern_core::error::SettingsError;
use lectern_core::settings::{ChatSettings, SettingsStore};
use tracing::{info, warn};

/// Loads settings with defaults and saves them debounced.
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    writer: DebouncedWriter,
    defaults: ChatSettings,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>, config: &AppConfig) -> Self {
        let delay = Duration::from_millis(config.settings.debounce_ms);
        Self {
            writer: DebouncedWriter::new(store.clone(), delay),
            store,
            defaults: config.initial_settings(),
        }
    }

    /// A file-backed service in the configured data directory.
    pub fn from_config(config: &AppConfig) -> Self {
        let data_dir = config.data_dir();
        info!(path = %data_dir.display(), "Using file settings store");
        Self::new(Arc::new(FileSettingsStore::new(&data_dir)), config)
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Settings a user starts with before saving anything.
    pub fn defaults(&self) -> &ChatSettings {
        &self.defaults
    }

    /// The user's stored settings, or the defaults. Storage errors fall back
    /// to the defaults.
    pub async fn load(&self, user_id: &str) -> ChatSettings {
        match self.store.load(user_id).await {
            Ok(Some(mut settings)) => {
                settings.normalize();
                settings
            }
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "Could not load settings, using defaults");
                self.defaults.clone()
            }
        }
    }

    /// Schedule a debounced write.
    pub async fn save(&self, user_id: &str, settings: ChatSettings) {
        self.writer.schedule(user_id, settings).await;
    }

    /// Write immediately, superseding any pending write.
    pub async fn save_now(&self, user_id: &str, settings: &ChatSettings) -> Result<(), SettingsError> {
        self.writer.flush(user_id, settings).await
    }

    /// Write out every debounced save that has not fired yet.
    pub async fn flush_pending(&self) {
        let written = self.writer.flush_all().await;
        if written > 0 {
            info!(written, "Flushed pending settings writes");
        }
    }
}

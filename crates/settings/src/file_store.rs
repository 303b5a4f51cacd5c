//! File-based settings store.
//!
//! All users share one JSON file mapping user id to settings record:
//!
//! ```json
//! { "alice": { "ollamaUrl": "http://localhost:11434", ... } }
//! ```
//!
//! Storage location: `<data_dir>/settings.json`. The file is read once on
//! creation and rewritten on every save or delete. Each rewrite goes to a
//! temporary file that is then renamed over the old one, and rewrites are
//! serialized so the last snapshot taken is the last one on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::error::SettingsError;
use lectern_core::settings::{ChatSettings, SettingsStore};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "settings.json";

pub struct FileSettingsStore {
    path: PathBuf,
    records: Arc<RwLock<BTreeMap<String, ChatSettings>>>,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Open the store in `data_dir`. A missing file starts empty; the file is
    /// created on first write.
    pub fn new(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), users = records.len(), "Settings store loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. Undecodable records are skipped, and an unreadable
    /// file counts as empty.
    fn load_from_disk(path: &Path) -> BTreeMap<String, ChatSettings> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        if content.trim().is_empty() {
            return BTreeMap::new();
        }

        let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Settings file is corrupt, starting empty");
                return BTreeMap::new();
            }
        };

        raw.into_iter()
            .filter_map(|(user, value)| match serde_json::from_value::<ChatSettings>(value) {
                Ok(mut settings) => {
                    settings.normalize();
                    Some((user, settings))
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "Skipping undecodable settings record");
                    None
                }
            })
            .collect()
    }

    /// Write all records as pretty JSON.
    async fn flush(&self) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock().await;
        let content = {
            let records = self.records.read().await;
            serde_json::to_string_pretty(&*records)
                .map_err(|e| SettingsError::Storage(format!("Failed to serialize settings: {e}")))?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SettingsError::Storage(format!("Failed to create settings directory: {e}"))
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| SettingsError::Storage(format!("Failed to write settings file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SettingsError::Storage(format!("Failed to replace settings file: {e}")))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, user_id: &str) -> Result<Option<ChatSettings>, SettingsError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, settings: &ChatSettings) -> Result<(), SettingsError> {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), settings.clone());
        self.flush().await?;
        debug!(user = %user_id, "Settings saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, SettingsError> {
        let removed = self.records.write().await.remove(user_id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }
}

//! In-memory settings store, for tests and throwaway sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::error::SettingsError;
use lectern_core::settings::{ChatSettings, SettingsStore};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySettingsStore {
    records: Arc<RwLock<HashMap<String, ChatSettings>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, user_id: &str) -> Result<Option<ChatSettings>, SettingsError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, settings: &ChatSettings) -> Result<(), SettingsError> {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), settings.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, SettingsError> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }
}

//! Debounced settings writes.
//!
//! Settings change in bursts (typing a URL, dragging a slider). Each change
//! schedules a write after a quiet period; a newer change for the same user
//! cancels the pending one, so only the last value in a burst is stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lectern_core::error::SettingsError;
use lectern_core::settings::{ChatSettings, SettingsStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A scheduled write and the value it will store.
struct PendingWrite {
    task: JoinHandle<()>,
    settings: ChatSettings,
}

pub struct DebouncedWriter {
    store: Arc<dyn SettingsStore>,
    delay: Duration,
    pending: Mutex<HashMap<String, PendingWrite>>,
}

impl DebouncedWriter {
    pub fn new(store: Arc<dyn SettingsStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Store `settings` for `user_id` once no newer change arrives within the delay.
    pub async fn schedule(&self, user_id: &str, settings: ChatSettings) {
        let store = self.store.clone();
        let delay = self.delay;
        let user = user_id.to_string();

        let value = settings.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.save(&user, &value).await {
                Ok(()) => debug!(user = %user, "Debounced settings write"),
                Err(e) => warn!(user = %user, error = %e, "Debounced settings write failed"),
            }
        });

        let write = PendingWrite { task, settings };
        if let Some(previous) = self.pending.lock().await.insert(user_id.to_string(), write) {
            previous.task.abort();
        }
    }

    /// Cancel any pending write for `user_id` and store `settings` now.
    pub async fn flush(&self, user_id: &str, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(previous) = self.pending.lock().await.remove(user_id) {
            previous.task.abort();
        }
        self.store.save(user_id, settings).await
    }

    /// Store every write still waiting out its delay. Returns how many were
    /// written.
    pub async fn flush_all(&self) -> usize {
        let waiting: Vec<(String, PendingWrite)> = self
            .pending
            .lock()
            .await
            .drain()
            .filter(|(_, write)| !write.task.is_finished())
            .collect();

        let mut written = 0;
        for (user, write) in waiting {
            write.task.abort();
            match self.store.save(&user, &write.settings).await {
                Ok(()) => written += 1,
                Err(e) => warn!(user = %user, error = %e, "Settings write on flush failed"),
            }
        }
        written
    }

    /// Number of writes still waiting out their delay.
    pub async fn pending(&self) -> usize {
        self.pending
            .lock()
            .await
            .values()
            .filter(|write| !write.task.is_finished())
            .count()
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        for (_, write) in self.pending.get_mut().drain() {
            write.task.abort();
        }
    }
}

//! Connection state and the background connection monitor.
//!
//! While a model is selected, the monitor re-checks it with `show` on a fixed
//! interval. The first failed or timed-out check clears the selection, marks
//! the session disconnected, and ends the monitor. A retry from the user
//! starts a fresh one.

use std::sync::Arc;
use std::time::Duration;

use lectern_core::model::ModelClient;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What the session currently knows about the model server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub selected_model: Option<String>,
    pub models: Vec<String>,
    pub error: Option<String>,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        self.connected && self.selected_model.is_some()
    }

    pub fn features(&self) -> FeatureAvailability {
        let ready = self.is_ready();
        FeatureAvailability {
            send: ready,
            rag: ready,
            citations: ready,
            system_message: ready,
        }
    }

    /// Record a failed check.
    pub fn mark_disconnected(&mut self, error: impl Into<String>) {
        self.connected = false;
        self.selected_model = None;
        self.error = Some(error.into());
    }
}

/// Which features the client may offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAvailability {
    pub send: bool,
    pub rag: bool,
    pub citations: bool,
    pub system_message: bool,
}

/// A running monitor. Dropping the handle stops it.
#[derive(Debug)]
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start monitoring the selected model in `state`.
///
/// The first check runs one `interval` after start.
pub fn spawn_monitor(
    client: Arc<dyn ModelClient>,
    state: Arc<RwLock<ConnectionState>>,
    interval: Duration,
    check_timeout: Duration,
) -> MonitorHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(model) = state.read().await.selected_model.clone() else {
                debug!("No model selected, stopping connection monitor");
                return;
            };

            let failure = match tokio::time::timeout(check_timeout, client.show(&model)).await {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!(
                    "model server did not answer within {}s",
                    check_timeout.as_secs()
                )),
            };

            match failure {
                None => debug!(model = %model, "Connection check passed"),
                Some(error) => {
                    warn!(model = %model, %error, "Connection check failed, disconnecting");
                    let mut s = state.write().await;
                    // A retry may have switched models while the check ran
                    if s.selected_model.as_deref() == Some(model.as_str()) {
                        s.mark_disconnected(error);
                    }
                    info!("Connection monitor stopped");
                    return;
                }
            }
        }
    });

    MonitorHandle { task }
}

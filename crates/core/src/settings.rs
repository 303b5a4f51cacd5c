//! Per-user chat settings and the store trait that persists them.
//!
//! Settings are a flat record keyed by user id. The JSON shape uses
//! camelCase keys so files written by earlier clients keep loading.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Themes a client may select, in cycling order.
pub const THEMES: [&str; 7] = [
    "light",
    "dark",
    "muted-green",
    "gray",
    "muted-orange",
    "forest",
    "muted-blue",
];

pub const FONT_SIZE_MIN: u8 = 10;
pub const FONT_SIZE_MAX: u8 = 24;
pub const FONT_SIZE_DEFAULT: u8 = 14;
pub const FONT_SIZE_STEP: u8 = 2;

/// Most system messages remembered per user.
pub const SYSTEM_MESSAGE_HISTORY_LIMIT: usize = 20;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_RAG_URL: &str = "http://localhost:9042";
pub const DEFAULT_RAG_PORT: u16 = 9042;
pub const DEFAULT_RAG_THRESHOLD: f64 = 0.6;

/// Who the user is, fed into the prompt's user-context block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, rename = "userPreferredName")]
    pub preferred_name: String,

    #[serde(default, rename = "userSchoolOrOffice")]
    pub school_or_office: String,

    #[serde(default, rename = "userRole")]
    pub role: String,

    #[serde(default, rename = "userContext")]
    pub context: String,
}

impl UserProfile {
    /// Whether every field is blank.
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.trim().is_empty())
    }

    /// Keys of the blank fields, in form order.
    pub fn missing_fields(&self) -> Vec<String> {
        self.fields()
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| (*k).to_string())
            .collect()
    }

    fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("userPreferredName", &self.preferred_name),
            ("userSchoolOrOffice", &self.school_or_office),
            ("userRole", &self.role),
            ("userContext", &self.context),
        ]
    }
}

/// Everything a user can configure about their chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSettings {
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Empty means "derive from the Ollama URL"
    #[serde(default)]
    pub rag_server_url: String,

    #[serde(default = "default_rag_threshold")]
    pub rag_threshold: f64,

    #[serde(default)]
    pub rag_collections: Vec<String>,

    #[serde(default = "default_true")]
    pub rag_enabled: bool,

    #[serde(default)]
    pub system_message: String,

    /// Most recent first, no duplicates
    #[serde(default)]
    pub system_message_history: Vec<String>,

    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_state: Option<String>,

    #[serde(default = "default_font_size")]
    pub chat_font_size: u8,

    #[serde(flatten)]
    pub profile: UserProfile,
}

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.into()
}
fn default_rag_threshold() -> f64 {
    DEFAULT_RAG_THRESHOLD
}
fn default_true() -> bool {
    true
}
fn default_theme() -> String {
    THEMES[0].into()
}
fn default_font_size() -> u8 {
    FONT_SIZE_DEFAULT
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            rag_server_url: String::new(),
            rag_threshold: DEFAULT_RAG_THRESHOLD,
            rag_collections: Vec::new(),
            rag_enabled: true,
            system_message: String::new(),
            system_message_history: Vec::new(),
            theme: default_theme(),
            panel_state: None,
            chat_font_size: FONT_SIZE_DEFAULT,
            profile: UserProfile::default(),
        }
    }
}

impl ChatSettings {
    /// Merge a partial update. Fields absent from the patch are untouched.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.ollama_url {
            self.ollama_url = v;
        }
        if let Some(v) = patch.rag_server_url {
            self.rag_server_url = v;
        }
        if let Some(v) = patch.rag_threshold {
            self.rag_threshold = v;
        }
        if let Some(v) = patch.rag_collections {
            self.rag_collections = v;
        }
        if let Some(v) = patch.rag_enabled {
            self.rag_enabled = v;
        }
        if let Some(v) = patch.system_message_history {
            self.system_message_history = v;
        }
        if let Some(v) = patch.system_message {
            self.remember_system_message(v);
        }
        if let Some(v) = patch.theme {
            self.theme = v;
        }
        if let Some(v) = patch.panel_state {
            self.panel_state = Some(v);
        }
        if let Some(v) = patch.chat_font_size {
            self.chat_font_size = v;
        }
        if let Some(v) = patch.user_preferred_name {
            self.profile.preferred_name = v;
        }
        if let Some(v) = patch.user_school_or_office {
            self.profile.school_or_office = v;
        }
        if let Some(v) = patch.user_role {
            self.profile.role = v;
        }
        if let Some(v) = patch.user_context {
            self.profile.context = v;
        }
        self.normalize();
    }

    /// Set the active system message and move it to the front of the history.
    pub fn remember_system_message(&mut self, message: String) {
        if !message.trim().is_empty() {
            self.system_message_history.retain(|m| m != &message);
            self.system_message_history.insert(0, message.clone());
        }
        self.system_message = message;
        self.system_message_history
            .truncate(SYSTEM_MESSAGE_HISTORY_LIMIT);
    }

    /// Coerce out-of-range values back into range.
    pub fn normalize(&mut self) {
        if !THEMES.contains(&self.theme.as_str()) {
            self.theme = default_theme();
        }
        if !(FONT_SIZE_MIN..=FONT_SIZE_MAX).contains(&self.chat_font_size) {
            self.chat_font_size = FONT_SIZE_DEFAULT;
        }
        if !self.rag_threshold.is_finite() {
            self.rag_threshold = DEFAULT_RAG_THRESHOLD;
        }
        self.rag_threshold = self.rag_threshold.clamp(0.0, 1.0);

        let mut seen = std::collections::HashSet::new();
        self.system_message_history
            .retain(|m| !m.trim().is_empty() && seen.insert(m.clone()));
        self.system_message_history
            .truncate(SYSTEM_MESSAGE_HISTORY_LIMIT);
        self.ollama_url = self.ollama_url.trim().to_string();
        self.rag_server_url = self.rag_server_url.trim().to_string();
    }

    /// The RAG server URL in effect: the configured one, or one derived from
    /// the Ollama host.
    pub fn effective_rag_url(&self) -> String {
        if self.rag_server_url.is_empty() {
            derive_rag_url(&self.ollama_url)
        } else {
            self.rag_server_url.clone()
        }
    }

    /// The theme after `current` in cycling order.
    pub fn next_theme(current: &str) -> &'static str {
        match THEMES.iter().position(|t| *t == current) {
            Some(i) => THEMES[(i + 1) % THEMES.len()],
            None => THEMES[0],
        }
    }

    /// Font size one step larger or smaller, clamped to the allowed range.
    pub fn step_font_size(current: u8, larger: bool) -> u8 {
        let next = if larger {
            current.saturating_add(FONT_SIZE_STEP)
        } else {
            current.saturating_sub(FONT_SIZE_STEP)
        };
        next.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX)
    }
}

/// `scheme://host:9042` taken from the Ollama URL, or the stock default.
pub fn derive_rag_url(ollama_url: &str) -> String {
    let trimmed = ollama_url.trim();
    if let Some((scheme, rest)) = trimmed.split_once("://") {
        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = match host.rsplit_once(':') {
            Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => host,
        };
        if !scheme.is_empty() && !host.is_empty() {
            return format!("{scheme}://{host}:{DEFAULT_RAG_PORT}");
        }
    }
    DEFAULT_RAG_URL.into()
}

/// A partial settings update. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_collections: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message_history: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_font_size: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferred_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_school_or_office: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<String>,
}

impl SettingsPatch {
    /// Whether this patch changes where the model or RAG server lives.
    pub fn touches_endpoints(&self) -> bool {
        self.ollama_url.is_some() || self.rag_server_url.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Persistence for per-user settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Human-readable backend name, for logs.
    fn name(&self) -> &str;

    /// Settings for `user_id`, or `None` if the user has never saved any.
    async fn load(&self, user_id: &str) -> std::result::Result<Option<ChatSettings>, SettingsError>;

    /// Replace the stored record for `user_id`.
    async fn save(
        &self,
        user_id: &str,
        settings: &ChatSettings,
    ) -> std::result::Result<(), SettingsError>;

    /// Remove the stored record. Returns whether one existed.
    async fn delete(&self, user_id: &str) -> std::result::Result<bool, SettingsError>;
}

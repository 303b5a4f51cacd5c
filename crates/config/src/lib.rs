//! Configuration loading, validation, and management for Lectern.
//!
//! Loads configuration from `~/.lectern/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use lectern_core::settings::{
    ChatSettings, DEFAULT_OLLAMA_URL, DEFAULT_RAG_THRESHOLD, derive_rag_url,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lectern/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Model server defaults
    #[serde(default)]
    pub model: ModelConfig,

    /// Retrieval server defaults
    #[serde(default)]
    pub rag: RagConfig,

    /// Conversation tuning
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Per-user settings storage
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ollama URL given to users who have not chosen one
    #[serde(default = "default_model_url")]
    pub default_url: String,

    /// Connect timeout, and the deadline for tags, show and single-shot
    /// generate. Streamed replies are not bounded.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Bounded wait for metadata checks
    #[serde(default = "default_show_timeout")]
    pub show_timeout_secs: u64,
}

fn default_model_url() -> String {
    DEFAULT_OLLAMA_URL.into()
}
fn default_request_timeout() -> u64 {
    300
}
fn default_show_timeout() -> u64 {
    5
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_url: default_model_url(),
            request_timeout_secs: default_request_timeout(),
            show_timeout_secs: default_show_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// RAG URL given to new users; derived from the model URL when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,

    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    /// Collections pre-selected for new users
    #[serde(default)]
    pub default_collections: Vec<String>,

    /// How many hits feed the prompt
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_rag_timeout")]
    pub request_timeout_secs: u64,
}

fn default_threshold() -> f64 {
    DEFAULT_RAG_THRESHOLD
}
fn default_top_k() -> usize {
    8
}
fn default_rag_timeout() -> u64 {
    30
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            default_threshold: default_threshold(),
            default_collections: vec![],
            top_k: default_top_k(),
            request_timeout_secs: default_rag_timeout(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Tokens held back from the context window for the model's reply
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// After a failed summary, truncate only transcripts longer than this
    #[serde(default = "default_truncate_above")]
    pub summary_truncate_above: usize,

    /// Turns kept by truncation
    #[serde(default = "default_keep_last")]
    pub summary_keep_last: usize,

    /// Shorter messages never trigger retrieval on their own
    #[serde(default = "default_min_substantive_chars")]
    pub min_substantive_chars: usize,

    /// Greetings and acknowledgements that never trigger retrieval on their own
    #[serde(default = "default_trivial_phrases")]
    pub trivial_phrases: Vec<String>,

    /// System message given to new users
    #[serde(default)]
    pub default_system_message: String,

    /// Append a "Some related resources" list to assistant replies
    #[serde(default)]
    pub append_related_resources: bool,
}

fn default_reserved_tokens() -> usize {
    500
}
fn default_monitor_interval() -> u64 {
    5
}
fn default_truncate_above() -> usize {
    10
}
fn default_keep_last() -> usize {
    5
}
fn default_min_substantive_chars() -> usize {
    15
}

/// The stock set of messages too slight to search documents for.
pub fn default_trivial_phrases() -> Vec<String> {
    [
        "hi", "hello", "hey", "ok", "okay", "thanks", "thank you", "yes", "no", "?", "!", ".",
        "nope", "yep", "yup", "sup", "yo", "hiya", "howdy", "greetings", "good morning",
        "good afternoon", "good evening", "bye", "goodbye", "lol", "lmao",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            reserved_tokens: default_reserved_tokens(),
            monitor_interval_secs: default_monitor_interval(),
            summary_truncate_above: default_truncate_above(),
            summary_keep_last: default_keep_last(),
            min_substantive_chars: default_min_substantive_chars(),
            trivial_phrases: default_trivial_phrases(),
            default_system_message: String::new(),
            append_related_resources: false,
        }
    }
}

impl std::fmt::Debug for ConversationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationConfig")
            .field("reserved_tokens", &self.reserved_tokens)
            .field("monitor_interval_secs", &self.monitor_interval_secs)
            .field("summary_truncate_above", &self.summary_truncate_above)
            .field("summary_keep_last", &self.summary_keep_last)
            .field("min_substantive_chars", &self.min_substantive_chars)
            .field("trivial_phrases", &self.trivial_phrases.len())
            .field(
                "default_system_message",
                &format_args!("<{} chars>", self.default_system_message.chars().count()),
            )
            .field("append_related_resources", &self.append_related_resources)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Where `settings.json` lives; defaults to `~/.lectern/data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lectern/config.toml).
    ///
    /// Environment variables override file values:
    /// - `LECTERN_DATA_DIR`
    /// - `LECTERN_DEFAULT_OLLAMA_URL`
    /// - `LECTERN_DEFAULT_RAG_SERVER_URL`
    /// - `LECTERN_DEFAULT_RAG_THRESHOLD`
    /// - `LECTERN_DEFAULT_RAG_COLLECTIONS` (comma-separated)
    /// - `LECTERN_DEFAULT_SYSTEM_MESSAGE`
    /// - `LECTERN_GATEWAY_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Blank values are ignored,
    /// as are thresholds that do not parse.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = get("LECTERN_DATA_DIR") {
            self.settings.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = get("LECTERN_DEFAULT_OLLAMA_URL") {
            self.model.default_url = url;
        }
        if let Some(url) = get("LECTERN_DEFAULT_RAG_SERVER_URL") {
            self.rag.default_url = Some(url);
        }
        if let Some(threshold) = get("LECTERN_DEFAULT_RAG_THRESHOLD") {
            match threshold.parse::<f64>() {
                Ok(n) if n.is_finite() => self.rag.default_threshold = n,
                _ => tracing::warn!(value = %threshold, "Ignoring unparseable LECTERN_DEFAULT_RAG_THRESHOLD"),
            }
        }
        if let Some(collections) = get("LECTERN_DEFAULT_RAG_COLLECTIONS") {
            let parsed: Vec<String> = collections
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !parsed.is_empty() {
                self.rag.default_collections = parsed;
            }
        }
        // The system message keeps its surrounding whitespace.
        if let Some(message) = lookup("LECTERN_DEFAULT_SYSTEM_MESSAGE").filter(|m| !m.is_empty()) {
            self.conversation.default_system_message = message;
        }
        if let Some(port) = get("LECTERN_GATEWAY_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring unparseable LECTERN_GATEWAY_PORT"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lectern")
    }

    /// Directory holding `settings.json`.
    pub fn data_dir(&self) -> PathBuf {
        self.settings
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("data"))
    }

    /// The settings a user starts with before saving anything.
    pub fn initial_settings(&self) -> ChatSettings {
        let mut settings = ChatSettings {
            ollama_url: self.model.default_url.clone(),
            rag_server_url: self
                .rag
                .default_url
                .clone()
                .unwrap_or_else(|| derive_rag_url(&self.model.default_url)),
            rag_threshold: self.rag.default_threshold,
            rag_collections: self.rag.default_collections.clone(),
            ..ChatSettings::default()
        };
        settings.remember_system_message(self.conversation.default_system_message.clone());
        settings.normalize();
        settings
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rag.default_threshold) {
            return Err(ConfigError::ValidationError(
                "rag.default_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if self.rag.top_k == 0 {
            return Err(ConfigError::ValidationError("rag.top_k must be > 0".into()));
        }

        if self.conversation.monitor_interval_secs == 0 || self.model.show_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "monitor interval and show timeout must be > 0".into(),
            ));
        }

        if self.conversation.summary_keep_last == 0
            || self.conversation.summary_keep_last > self.conversation.summary_truncate_above
        {
            return Err(ConfigError::ValidationError(
                "summary_keep_last must be between 1 and summary_truncate_above".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

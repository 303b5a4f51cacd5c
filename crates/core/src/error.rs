//! Error types for the Lectern domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Lectern operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model server errors ---
    #[error("Model server error: {0}")]
    Model(#[from] ModelError),

    // --- Retrieval server errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Settings errors ---
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    // --- Conversation errors ---
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model server request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Model server not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from model server: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Retrieval server not configured: {0}")]
    NotConfigured(String),

    #[error("Retrieval request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from retrieval server: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings storage error: {0}")]
    Storage(String),

    #[error("Settings could not be decoded: {0}")]
    Decode(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Reasons a send (or another conversation action) is refused before any
/// request goes out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("A response is still streaming; wait for it to finish")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Not ready to send: {0}")]
    NotReady(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

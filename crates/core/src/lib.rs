//! # Lectern Core
//!
//! Domain types, traits, and error definitions for the Lectern conversation
//! client. This crate has **no HTTP or storage dependencies** — it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each external collaborator (model server, retrieval server, settings
//! store) is a trait here. Implementations live in their respective crates.
//! This enables:
//! - Swapping HTTP backends for mocks in tests
//! - Building clients per user from whatever URL their settings carry
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod citation;
pub mod error;
pub mod message;
pub mod model;
pub mod retrieval;
pub mod settings;

// Re-export key types at crate root for ergonomics
pub use backend::BackendFactory;
pub use citation::Citation;
pub use error::{ConversationError, Error, ModelError, Result, RetrievalError, SettingsError};
pub use message::{Role, Transcript, Turn};
pub use model::{GenerateChunk, GenerateRequest, ModelClient, ModelDetails, ModelSummary};
pub use retrieval::{RetrievalClient, RetrievalHit, RetrievalQuery};
pub use settings::{ChatSettings, SettingsPatch, SettingsStore, UserProfile};

//! Server clients for Lectern.
//!
//! [`OllamaClient`] implements `lectern_core::ModelClient` and
//! [`HttpRetrievalClient`] implements `lectern_core::RetrievalClient`.
//! [`HttpBackends`] builds both from per-user URLs.

pub mod factory;
pub mod ndjson;
pub mod ollama;
pub mod rag;

pub use factory::HttpBackends;
pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaClient;
pub use rag::HttpRetrievalClient;

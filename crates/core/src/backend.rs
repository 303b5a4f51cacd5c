//! Construction of server clients from user-supplied URLs.

use std::sync::Arc;

use crate::model::ModelClient;
use crate::retrieval::RetrievalClient;

/// Builds clients for whatever URLs a user's settings currently point at.
///
/// The controller asks for a fresh client whenever a URL changes, so
/// implementations should make construction cheap (share connection pools).
pub trait BackendFactory: Send + Sync {
    fn model_client(&self, base_url: &str) -> Arc<dyn ModelClient>;

    fn retrieval_client(&self, base_url: &str) -> Arc<dyn RetrievalClient>;
}

//! # Lectern Conversation
//!
//! The conversation-management core: everything between "the user typed a
//! message" and "the reply is in the transcript".
//!
//! ## Pipeline
//!
//! 1. **Retrieval** ([`retrieval`]) decides whether to search documents and
//!    turns hits into a context block plus citation candidates.
//! 2. **Citations** ([`citations`]) records candidates per turn and ranks
//!    sources for the relevant-resources view.
//! 3. **Budget** ([`budget`]) keeps the prompt inside the model's context
//!    window ([`context_window`]) by summarizing or truncating history.
//! 4. **Prompt** ([`prompt`]) assembles the final text.
//! 5. **Controller** ([`controller`]) streams the reply and owns the
//!    connection [`monitor`].

pub mod budget;
pub mod citations;
pub mod context_window;
pub mod controller;
pub mod monitor;
pub mod prompt;
pub mod retrieval;
pub mod stream_event;
pub mod token;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use budget::{BudgetOutcome, HistoryBudgetManager};
pub use citations::{ChangeState, CitationEntry, CitationLedger, CitationView, RemovedCitation};
pub use controller::{ConversationController, validate_intro};
pub use monitor::{ConnectionState, FeatureAvailability};
pub use retrieval::RetrievalPolicy;
pub use stream_event::{ChatStreamEvent, SendOutcome};
pub use token::estimate_tokens;

//! Conversation-level streaming events.
//!
//! `ChatStreamEvent` reports what a send is doing as it happens, so the
//! gateway can forward progress to clients over SSE and the terminal client
//! can print the reply as it streams.

use lectern_core::citation::Citation;
use lectern_core::message::Turn;
use serde::{Deserialize, Serialize};

/// Events emitted while a message is being sent.
///
/// - `citations_recorded`   — retrieval found sources for this turn
/// - `summarizing`          — history is over budget and being condensed
/// - `summarized`           — history was replaced by a summary
/// - `summarization_failed` — summary failed; history may have been truncated
/// - `chunk`                — partial reply text
/// - `done`                 — the reply is complete
/// - `error`                — the send failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Sources recorded for the current user turn.
    CitationsRecorded {
        turn_index: u64,
        sources: Vec<Citation>,
    },

    /// Over budget; a summary request is in flight.
    Summarizing { estimated_tokens: usize, budget: usize },

    /// History now holds a single summary turn plus the pending message.
    Summarized { summary: String },

    /// Summary failed. `truncated` tells whether older turns were dropped.
    SummarizationFailed { truncated: bool, reason: String },

    /// Partial reply text.
    Chunk { content: String },

    /// The reply is complete.
    Done { turns: usize, citations: usize },

    /// The send failed. The transcript already ends with an error turn.
    Error { message: String },
}

impl ChatStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CitationsRecorded { .. } => "citations_recorded",
            Self::Summarizing { .. } => "summarizing",
            Self::Summarized { .. } => "summarized",
            Self::SummarizationFailed { .. } => "summarization_failed",
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// What a completed send produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// The final assistant turn, or `None` if the model returned nothing
    pub reply: Option<Turn>,
    pub turns: usize,
    pub citations: usize,
    /// Set when generation failed; the reply is then the error turn
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_with_type_tag() {
        let event = ChatStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn citations_event_carries_sources() {
        let event = ChatStreamEvent::CitationsRecorded {
            turn_index: 3,
            sources: vec![Citation {
                source_name: "Guide.pdf".into(),
                url: "http://rag/fetch/a/Guide.pdf".into(),
                turn_index: 3,
                similarity: Some(0.8),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"citations_recorded""#));
        assert!(json.contains(r#""turn_index":3"#));
    }

    #[test]
    fn event_type_names_match_tags() {
        let events = vec![
            ChatStreamEvent::Summarizing {
                estimated_tokens: 5000,
                budget: 3596,
            },
            ChatStreamEvent::Summarized {
                summary: "s".into(),
            },
            ChatStreamEvent::SummarizationFailed {
                truncated: true,
                reason: "timeout".into(),
            },
            ChatStreamEvent::Done {
                turns: 2,
                citations: 0,
            },
            ChatStreamEvent::Error {
                message: "x".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(ChatStreamEvent::Error { message: "x".into() }.is_terminal());
        assert!(
            ChatStreamEvent::Done {
                turns: 0,
                citations: 0
            }
            .is_terminal()
        );
        assert!(!ChatStreamEvent::Chunk { content: "x".into() }.is_terminal());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"chunk","content":"hi"}"#;
        let event: ChatStreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ChatStreamEvent::Chunk { content: "hi".into() });
    }
}

//! History budget management.
//!
//! Keeps the assembled prompt inside the model's context window. When a
//! prompt is over budget and there is history to work with, the prior turns
//! are condensed into one summary turn by the model itself. If that fails the
//! history is truncated instead (only when it is long) and the send goes
//! ahead regardless.

use lectern_config::ConversationConfig;
use lectern_core::message::{Transcript, Turn};
use lectern_core::model::{GenerateRequest, ModelClient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stream_event::ChatStreamEvent;
use crate::token::estimate_tokens;

pub const SUMMARY_REQUEST_PREFIX: &str =
    "Please provide a concise summary of the following conversation history:\n\n";

/// How the budget check ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetOutcome {
    /// The prompt fits.
    WithinBudget,
    /// Over budget with no history to condense; sent as is.
    OverBudget,
    /// History was replaced by a summary turn.
    Summarized,
    /// Summary failed. `truncated` tells whether older turns were dropped.
    SummarizationFailed { truncated: bool },
}

/// A prompt that has been through the budget check.
#[derive(Debug, Clone)]
pub struct BudgetedPrompt {
    pub prompt: String,
    pub outcome: BudgetOutcome,
}

#[derive(Debug, Clone)]
pub struct HistoryBudgetManager {
    reserved_tokens: usize,
    truncate_above: usize,
    keep_last: usize,
}

impl Default for HistoryBudgetManager {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default())
    }
}

impl HistoryBudgetManager {
    pub fn from_config(config: &ConversationConfig) -> Self {
        Self {
            reserved_tokens: config.reserved_tokens,
            truncate_above: config.summary_truncate_above,
            keep_last: config.summary_keep_last,
        }
    }

    /// Tokens available to the prompt for a given window.
    pub fn budget(&self, context_window: usize) -> usize {
        context_window.saturating_sub(self.reserved_tokens)
    }

    pub fn fits(&self, prompt: &str, context_window: usize) -> bool {
        estimate_tokens(prompt) <= self.budget(context_window)
    }

    /// Build the prompt for `transcript` and bring it under budget.
    ///
    /// `transcript` must end with the pending user turn. It is rewritten in
    /// place when history gets summarized or truncated. `build` renders a
    /// prompt from the transcript and is called again after any rewrite.
    pub async fn enforce<F>(
        &self,
        transcript: &mut Transcript,
        context_window: usize,
        client: &dyn ModelClient,
        model: &str,
        build: F,
        events: Option<&mpsc::Sender<ChatStreamEvent>>,
    ) -> BudgetedPrompt
    where
        F: Fn(&Transcript) -> String,
    {
        let prompt = build(transcript);
        let estimated = estimate_tokens(&prompt);
        let budget = self.budget(context_window);

        if estimated <= budget {
            debug!(estimated, budget, "Prompt within budget");
            return BudgetedPrompt {
                prompt,
                outcome: BudgetOutcome::WithinBudget,
            };
        }

        if transcript.len() <= 1 {
            warn!(estimated, budget, "Prompt over budget with no history to condense");
            return BudgetedPrompt {
                prompt,
                outcome: BudgetOutcome::OverBudget,
            };
        }

        info!(
            estimated,
            budget,
            turns = transcript.len(),
            "Prompt over budget, summarizing history"
        );
        emit(
            events,
            ChatStreamEvent::Summarizing {
                estimated_tokens: estimated,
                budget,
            },
        )
        .await;

        let request = GenerateRequest::new(model, summary_prompt(transcript.before_last()));
        let result = client
            .generate(request)
            .await
            .map_err(|e| e.to_string())
            .and_then(|s| {
                let s = s.trim().to_string();
                if s.is_empty() {
                    Err("model returned an empty summary".to_string())
                } else {
                    Ok(s)
                }
            });

        let outcome = match result {
            Ok(summary) => {
                let pending = transcript.pop();
                let mut turns = vec![summary_turn(&summary)];
                turns.extend(pending);
                transcript.replace(turns);
                info!(chars = summary.chars().count(), "History summarized");
                emit(events, ChatStreamEvent::Summarized { summary }).await;
                BudgetOutcome::Summarized
            }
            Err(reason) => {
                let truncated = transcript.len() > self.truncate_above;
                if truncated {
                    transcript.keep_last(self.keep_last);
                }
                warn!(%reason, truncated, turns = transcript.len(), "Summarization failed");
                emit(events, ChatStreamEvent::SummarizationFailed { truncated, reason }).await;
                BudgetOutcome::SummarizationFailed { truncated }
            }
        };

        BudgetedPrompt {
            prompt: build(transcript),
            outcome,
        }
    }
}

/// The request asking the model to condense `history`.
pub fn summary_prompt(history: &[Turn]) -> String {
    let body: Vec<String> = history
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect();
    format!("{SUMMARY_REQUEST_PREFIX}{}\n\nSummary:", body.join("\n\n"))
}

/// The assistant turn that stands in for summarized history.
pub fn summary_turn(summary: &str) -> Turn {
    Turn::assistant(format!("[Previous conversation summarized: {summary}]"))
}

async fn emit(events: Option<&mpsc::Sender<ChatStreamEvent>>, event: ChatStreamEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

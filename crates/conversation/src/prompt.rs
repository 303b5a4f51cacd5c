//! Prompt assembly.
//!
//! Builds the single text prompt sent to the model from five sections, in a
//! fixed order:
//!
//! 1. **System** message
//! 2. **User context** (profile fields the user filled in)
//! 3. **Retrieved context** from the RAG server, verbatim
//! 4. **Dialogue** history, oldest first
//! 5. **Closing instruction** and the current user message
//!
//! Reordering sections changes model behavior and counts as a breaking
//! change. Assembly is deterministic: identical inputs always produce
//! identical output.

use lectern_core::message::{Role, Turn};
use lectern_core::settings::UserProfile;

// ── Fixed text ────────────────────────────────────────────────────────────

pub const USER_CONTEXT_HEADER: &str =
    "User context (use this when addressing the user and framing advice):";

pub const CLOSING_INSTRUCTION: &str = "Use all of the above context (system instructions, conversation history, and any retrieved information) to respond thoughtfully to the user's latest prompt, which is below. Provide an integrated response written in your established coaching voice. Do not label speakers. When appropriate, connect the response to earlier insights or tensions already identified in the conversation.";

/// Marks where a rendered list of sources begins inside an assistant turn.
pub const RELATED_RESOURCES_MARKER: &str = "\n\nSome related resources:\n";

// ── Types ─────────────────────────────────────────────────────────────────

/// Everything the assembler needs for one prompt. All borrowed.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub system_message: &'a str,
    pub profile: &'a UserProfile,
    /// Pre-formatted retrieval block, if retrieval ran and found anything
    pub rag_context: Option<&'a str>,
    /// Prior turns, excluding the message being answered
    pub history: &'a [Turn],
    pub user_message: &'a str,
}

// ── Assembly ──────────────────────────────────────────────────────────────

/// Assemble the full prompt.
pub fn assemble(input: &PromptInput<'_>) -> String {
    let mut prompt = String::new();

    if !input.system_message.is_empty() {
        prompt.push_str("System: ");
        prompt.push_str(input.system_message);
        prompt.push_str("\n\n");
    }

    if let Some(block) = user_context_block(input.profile) {
        prompt.push_str(&block);
    }

    if let Some(rag) = input.rag_context {
        prompt.push_str(rag);
    }

    for turn in input.history {
        prompt.push_str(turn.role.label());
        prompt.push_str(": ");
        prompt.push_str(content_for_prompt(turn));
        prompt.push_str("\n\n");
    }

    prompt.push_str(CLOSING_INSTRUCTION);
    prompt.push_str("\n\nUser: ");
    prompt.push_str(input.user_message);
    prompt.push_str("\n\nAssistant:");
    prompt
}

/// The user-context section, or `None` when every profile field is blank.
pub fn user_context_block(profile: &UserProfile) -> Option<String> {
    let lines: Vec<String> = [
        ("Preferred name", &profile.preferred_name),
        ("School or office", &profile.school_or_office),
        ("Role", &profile.role),
        ("Context about school/office", &profile.context),
    ]
    .into_iter()
    .filter_map(|(label, value)| {
        let value = value.trim();
        (!value.is_empty()).then(|| format!("{label}: {value}"))
    })
    .collect();

    if lines.is_empty() {
        return None;
    }
    Some(format!("{USER_CONTEXT_HEADER}\n{}\n\n", lines.join("\n")))
}

/// Turn content as it may appear in a prompt. Assistant turns lose any
/// appended list of related resources so source listings are never fed
/// back to the model.
pub fn content_for_prompt(turn: &Turn) -> &str {
    if turn.role == Role::Assistant {
        strip_related_resources(&turn.content)
    } else {
        &turn.content
    }
}

pub fn strip_related_resources(content: &str) -> &str {
    match content.find(RELATED_RESOURCES_MARKER) {
        Some(idx) => content[..idx].trim_end(),
        None => content,
    }
}

/// Append a `- name: url` list of sources after the marker.
pub fn append_related_resources(content: &str, sources: &[(String, String)]) -> String {
    if sources.is_empty() {
        return content.to_string();
    }
    let list: Vec<String> = sources
        .iter()
        .map(|(name, url)| format!("- {name}: {url}"))
        .collect();
    format!("{content}{RELATED_RESOURCES_MARKER}{}", list.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            preferred_name: " Sam ".into(),
            school_or_office: String::new(),
            role: "Principal".into(),
            context: "Rural K-8".into(),
        }
    }

    #[test]
    fn minimal_prompt_is_closing_block_only() {
        let empty = UserProfile::default();
        let prompt = assemble(&PromptInput {
            system_message: "",
            profile: &empty,
            rag_context: None,
            history: &[],
            user_message: "Hello there",
        });
        assert_eq!(
            prompt,
            format!("{CLOSING_INSTRUCTION}\n\nUser: Hello there\n\nAssistant:")
        );
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let p = profile();
        let history = vec![Turn::user("first q"), Turn::assistant("first a")];
        let prompt = assemble(&PromptInput {
            system_message: "Be a coach.",
            profile: &p,
            rag_context: Some("\n\nRAG BLOCK\n\n"),
            history: &history,
            user_message: "next q",
        });

        let system = prompt.find("System: Be a coach.\n\n").unwrap();
        let context = prompt.find(USER_CONTEXT_HEADER).unwrap();
        let rag = prompt.find("RAG BLOCK").unwrap();
        let user_turn = prompt.find("User: first q\n\n").unwrap();
        let assistant_turn = prompt.find("Assistant: first a\n\n").unwrap();
        let closing = prompt.find(CLOSING_INSTRUCTION).unwrap();
        assert_eq!(system, 0);
        assert!(system < context && context < rag && rag < user_turn);
        assert!(user_turn < assistant_turn && assistant_turn < closing);
        assert!(prompt.ends_with("User: next q\n\nAssistant:"));
    }

    #[test]
    fn user_context_lists_only_filled_fields() {
        let block = user_context_block(&profile()).unwrap();
        assert_eq!(
            block,
            format!(
                "{USER_CONTEXT_HEADER}\nPreferred name: Sam\nRole: Principal\nContext about school/office: Rural K-8\n\n"
            )
        );
        assert!(user_context_block(&UserProfile::default()).is_none());
    }

    #[test]
    fn assistant_resource_listing_is_stripped() {
        let turn = Turn::assistant(append_related_resources(
            "Plan the agenda first.  ",
            &[("Retreats.pdf".into(), "http://rag/fetch/a".into())],
        ));
        assert_eq!(content_for_prompt(&turn), "Plan the agenda first.");
    }

    #[test]
    fn user_content_is_never_stripped() {
        let text = format!("quote{RELATED_RESOURCES_MARKER}- x");
        let turn = Turn::user(text.clone());
        assert_eq!(content_for_prompt(&turn), text);
    }

    #[test]
    fn append_with_no_sources_is_identity() {
        assert_eq!(append_related_resources("answer", &[]), "answer");
    }

    #[test]
    fn assembly_is_deterministic() {
        let p = profile();
        let history = vec![Turn::user("a"), Turn::assistant("b")];
        let input = PromptInput {
            system_message: "s",
            profile: &p,
            rag_context: Some("r"),
            history: &history,
            user_message: "c",
        };
        assert_eq!(assemble(&input), assemble(&input));
    }
}

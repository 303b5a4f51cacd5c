//! Retrieval augmentation.
//!
//! Decides whether a message is worth a document search, turns the hits into
//! the prompt's context block, and derives one citation candidate per source.

use lectern_config::{ConversationConfig, RagConfig};
use lectern_core::message::Turn;
use lectern_core::retrieval::RetrievalHit;
use lectern_core::settings::ChatSettings;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::citations::CitationCandidate;

pub const CONTEXT_BLOCK_HEADER: &str = "\n\nRelevant context retrieved from documents appears below. Use it in developing your answer, but don't refer to the documents either individually or as a group in any way.\n\n";

/// Name used for hits that carry no source name.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// URL used when a source cannot be linked.
pub const UNLINKED_URL: &str = "#";

#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    min_substantive_chars: usize,
    trivial_phrases: Vec<String>,
    top_k: usize,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self::from_config(&ConversationConfig::default(), &RagConfig::default())
    }
}

impl RetrievalPolicy {
    pub fn from_config(conversation: &ConversationConfig, rag: &RagConfig) -> Self {
        Self {
            min_substantive_chars: conversation.min_substantive_chars,
            trivial_phrases: conversation
                .trivial_phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
            top_k: rag.top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Long enough and not a greeting or acknowledgement.
    pub fn is_substantive(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.min_substantive_chars {
            return false;
        }
        let lowered = trimmed.to_lowercase();
        !self.trivial_phrases.iter().any(|p| *p == lowered)
    }

    /// Whether this send should query the retrieval server.
    ///
    /// Short messages still query when there is history, since they are
    /// usually follow-ups that lean on earlier context.
    pub fn should_query(&self, settings: &ChatSettings, text: &str, has_history: bool) -> bool {
        settings.rag_enabled
            && !settings.rag_collections.is_empty()
            && !settings.effective_rag_url().is_empty()
            && (self.is_substantive(text) || has_history)
    }

    /// The `top_k` hits by similarity, best first. Missing similarity sorts as 0.
    pub fn select_hits(&self, mut hits: Vec<RetrievalHit>) -> Vec<RetrievalHit> {
        hits.sort_by(|a, b| {
            let a = a.similarity.unwrap_or(0.0);
            let b = b.similarity.unwrap_or(0.0);
            b.total_cmp(&a)
        });
        hits.truncate(self.top_k);
        hits
    }
}

/// The prompt section holding retrieved text, or `None` for no hits.
pub fn build_context_block(hits: &[RetrievalHit]) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let mut block = String::from(CONTEXT_BLOCK_HEADER);
    for (i, hit) in hits.iter().enumerate() {
        block.push_str(&format!("{}. {}\n\n", i + 1, hit.text));
    }
    Some(block)
}

pub fn source_name(hit: &RetrievalHit) -> &str {
    hit.source_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SOURCE)
}

/// Link for a hit's source.
///
/// An explicit source URL wins. Otherwise a fetch path is built from the
/// hit's collection (or `default_collection` when only one is selected) and
/// source name. Relative paths are joined to `rag_base`.
pub fn resolve_citation_url(
    hit: &RetrievalHit,
    rag_base: &str,
    default_collection: Option<&str>,
) -> String {
    let name = source_name(hit);
    let mut path = hit
        .source_url
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    if path.is_empty() && name != UNKNOWN_SOURCE {
        let group = hit.group.as_deref().or(default_collection);
        if let Some(group) = group.filter(|g| !g.is_empty()) {
            path = format!("/fetch/{}/{}", encode_component(group), encode_component(name));
        }
    }

    if path.is_empty() {
        return UNLINKED_URL.to_string();
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return path;
    }
    format!(
        "{}/{}",
        rag_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// One candidate per distinct source among `hits`, in first-seen order.
///
/// Sources are keyed by resolved URL, or by name when unlinked. The best
/// similarity among duplicates is kept.
pub fn citation_candidates(
    hits: &[RetrievalHit],
    rag_base: &str,
    default_collection: Option<&str>,
) -> Vec<CitationCandidate> {
    let mut candidates: Vec<(String, CitationCandidate)> = Vec::new();

    for hit in hits {
        let url = resolve_citation_url(hit, rag_base, default_collection);
        let name = source_name(hit).to_string();
        let key = if url == UNLINKED_URL {
            name.clone()
        } else {
            url.clone()
        };

        match candidates.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                if let Some(sim) = hit.similarity {
                    existing.similarity =
                        Some(existing.similarity.map_or(sim, |current| current.max(sim)));
                }
            }
            None => candidates.push((
                key,
                CitationCandidate {
                    source_name: name,
                    url,
                    similarity: hit.similarity,
                },
            )),
        }
    }

    candidates.into_iter().map(|(_, c)| c).collect()
}

/// Prior dialogue as `User: …` / `Assistant: …` lines, or `None` if empty.
pub fn history_for_query(history: &[Turn]) -> Option<String> {
    let text: String = history
        .iter()
        .map(|t| format!("{}: {}\n", t.role.label(), t.content))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

/// Bytes `encodeURIComponent` escapes: everything outside
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode one path segment.
pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

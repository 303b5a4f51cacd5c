//! Citation ranking, diffing, and the per-conversation citation ledger.
//!
//! Raw citations are bucketed by source, scored, and ordered for the
//! "relevant resources" list. Each time a new retrieval lands, the order the
//! user last saw is snapshotted so the next view can show which sources rose,
//! fell, stayed put, or are new.
//!
//! # Scoring
//!
//! `score = (strength + frequency + recency) / 3`, where strength is the
//! group's best similarity relative to the best overall, frequency is its
//! citation count relative to the most-cited group, and recency is 1 when the
//! group was cited by the newest retrieval. Equal scores are ordered by
//! identity key so ranking is fully deterministic.

use std::collections::{HashMap, HashSet};

use lectern_core::citation::{Citation, identity_key};
use serde::{Deserialize, Serialize};

/// Floor for the top score when computing emphasis.
const MIN_SCORE_FOR_EMPHASIS: f64 = 1e-6;

// ── Ranking ───────────────────────────────────────────────────────────────

/// All citations of one source, with its computed score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationGroup {
    pub key: String,
    pub source_name: String,
    pub url: String,
    pub count: usize,
    pub max_turn: u64,
    pub max_similarity: Option<f64>,
    pub score: f64,
}

/// Group, score, and order citations. Recomputed from scratch on every call.
pub fn rank(citations: &[Citation]) -> Vec<CitationGroup> {
    let mut by_key: HashMap<String, CitationGroup> = HashMap::new();
    let mut newest_turn: Option<u64> = None;

    for c in citations {
        newest_turn = Some(newest_turn.map_or(c.turn_index, |t| t.max(c.turn_index)));
        let group = by_key.entry(c.key()).or_insert_with(|| CitationGroup {
            key: c.key(),
            source_name: c.source_name.clone(),
            url: c.url.clone(),
            count: 0,
            max_turn: c.turn_index,
            max_similarity: None,
            score: 0.0,
        });
        group.count += 1;
        group.max_turn = group.max_turn.max(c.turn_index);
        if let Some(sim) = c.similarity {
            group.max_similarity = Some(group.max_similarity.map_or(sim, |m| m.max(sim)));
        }
    }

    let mut groups: Vec<CitationGroup> = by_key.into_values().collect();
    let max_count = groups.iter().map(|g| g.count).max().unwrap_or(0).max(1);
    let max_similarity = groups
        .iter()
        .map(|g| g.max_similarity.unwrap_or(0.0))
        .fold(0.0_f64, f64::max);

    for g in &mut groups {
        let strength = match g.max_similarity {
            Some(sim) if max_similarity > 0.0 => sim / max_similarity,
            _ => 0.0,
        };
        let frequency = g.count as f64 / max_count as f64;
        let recency = if Some(g.max_turn) == newest_turn { 1.0 } else { 0.0 };
        g.score = (strength + frequency + recency) / 3.0;
    }

    groups.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
    groups
}

// ── Diffing ───────────────────────────────────────────────────────────────

/// How a source moved relative to the previously shown order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeState {
    New,
    Rose,
    Fell,
    Same,
}

impl ChangeState {
    pub fn indicator(self) -> char {
        match self {
            ChangeState::Rose => '\u{2191}',
            ChangeState::Fell => '\u{2193}',
            ChangeState::Same => '\u{2013}',
            ChangeState::New => '\u{2022}',
        }
    }

    /// Accessible label for the indicator.
    pub fn label(self) -> &'static str {
        match self {
            ChangeState::Rose => "Risen",
            ChangeState::Fell => "Fallen",
            ChangeState::Same => "Same position",
            ChangeState::New => "New",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationChange {
    pub key: String,
    pub state: ChangeState,
    pub index: usize,
    pub previous_index: Option<usize>,
}

/// Compare current positions against a previous order. Purely positional.
pub fn diff(previous_keys: &[String], current: &[CitationGroup]) -> Vec<CitationChange> {
    let previous: HashMap<&str, usize> = previous_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    current
        .iter()
        .enumerate()
        .map(|(index, group)| {
            let previous_index = previous.get(group.key.as_str()).copied();
            let state = match previous_index {
                None => ChangeState::New,
                Some(prev) if index < prev => ChangeState::Rose,
                Some(prev) if index > prev => ChangeState::Fell,
                Some(_) => ChangeState::Same,
            };
            CitationChange {
                key: group.key.clone(),
                state,
                index,
                previous_index,
            }
        })
        .collect()
}

/// Visual weight in `[0.4, 1.0]` relative to the top score.
pub fn emphasis(score: f64, max_score: f64) -> f64 {
    0.4 + 0.6 * (score / max_score.max(MIN_SCORE_FOR_EMPHASIS))
}

// ── View ──────────────────────────────────────────────────────────────────

/// One row of the relevant-resources list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationEntry {
    pub source_name: String,
    pub url: String,
    pub count: usize,
    pub score: f64,
    pub emphasis: f64,
    pub state: ChangeState,
    pub indicator: char,
    pub label: String,
    pub index: usize,
    pub previous_index: Option<usize>,
}

/// A source the user saw last time that is no longer listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedCitation {
    pub key: String,
    pub source_name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationView {
    pub entries: Vec<CitationEntry>,
    pub removed: Vec<RemovedCitation>,
}

impl CitationView {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Ledger ────────────────────────────────────────────────────────────────

/// A source ready to be recorded, already deduplicated for its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationCandidate {
    pub source_name: String,
    pub url: String,
    pub similarity: Option<f64>,
}

/// Every citation of one conversation plus the order last shown.
#[derive(Debug, Clone, Default)]
pub struct CitationLedger {
    citations: Vec<Citation>,
    next_turn: u64,
    previous: Vec<CitationGroup>,
}

impl CitationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one retrieval's sources under a fresh turn index.
    ///
    /// The current order is snapshotted first so the next view diffs against
    /// what the user saw before these results arrived. Returns the turn index
    /// used, or `None` when there was nothing to record.
    pub fn record_turn(&mut self, candidates: Vec<CitationCandidate>) -> Option<u64> {
        if candidates.is_empty() {
            return None;
        }
        self.previous = rank(&self.citations);

        let turn_index = self.next_turn;
        self.citations
            .extend(candidates.into_iter().map(|c| Citation {
                source_name: c.source_name,
                url: c.url,
                turn_index,
                similarity: c.similarity,
            }));
        self.next_turn += 1;
        Some(turn_index)
    }

    /// Ranked sources with their movement since the previous snapshot.
    pub fn view(&self) -> CitationView {
        let groups = rank(&self.citations);
        let previous_keys: Vec<String> = self.previous.iter().map(|g| g.key.clone()).collect();
        let changes = diff(&previous_keys, &groups);
        let max_score = groups.iter().map(|g| g.score).fold(0.0_f64, f64::max);

        let current: HashSet<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        let removed = self
            .previous
            .iter()
            .filter(|g| !current.contains(g.key.as_str()))
            .map(|g| RemovedCitation {
                key: g.key.clone(),
                source_name: g.source_name.clone(),
                url: g.url.clone(),
            })
            .collect();

        let entries = groups
            .into_iter()
            .zip(changes)
            .map(|(g, change)| CitationEntry {
                emphasis: emphasis(g.score, max_score),
                source_name: g.source_name,
                url: g.url,
                count: g.count,
                score: g.score,
                state: change.state,
                indicator: change.state.indicator(),
                label: change.state.label().to_string(),
                index: change.index,
                previous_index: change.previous_index,
            })
            .collect();

        CitationView { entries, removed }
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Turn index the next recorded retrieval will receive.
    pub fn next_turn_index(&self) -> u64 {
        self.next_turn
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// Start over for a new conversation. Sources visible before the reset
    /// show up once as removed.
    pub fn clear(&mut self) {
        self.previous = rank(&self.citations);
        self.citations.clear();
        self.next_turn = 0;
    }

    /// Forget the snapshot too, leaving nothing to diff against.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Identity key for a candidate, matching [`Citation::key`].
pub fn candidate_key(c: &CitationCandidate) -> String {
    identity_key(&c.source_name, &c.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cite(name: &str, turn: u64, sim: Option<f64>) -> Citation {
        Citation {
            source_name: name.into(),
            url: format!("http://rag/{name}"),
            turn_index: turn,
            similarity: sim,
        }
    }

    fn candidate(name: &str, sim: Option<f64>) -> CitationCandidate {
        CitationCandidate {
            source_name: name.into(),
            url: format!("http://rag/{name}"),
            similarity: sim,
        }
    }

    fn group(name: &str) -> CitationGroup {
        CitationGroup {
            key: identity_key(name, &format!("http://rag/{name}")),
            source_name: name.into(),
            url: format!("http://rag/{name}"),
            count: 1,
            max_turn: 0,
            max_similarity: None,
            score: 0.0,
        }
    }

    fn key(name: &str) -> String {
        group(name).key
    }

    #[test]
    fn empty_list_ranks_to_nothing() {
        assert!(rank(&[]).is_empty());
    }

    #[test]
    fn groups_count_occurrences_and_keep_maxima() {
        let groups = rank(&[
            cite("A", 0, Some(0.5)),
            cite("A", 1, Some(0.9)),
            cite("B", 1, Some(0.7)),
        ]);
        let a = groups.iter().find(|g| g.source_name == "A").unwrap();
        assert_eq!(a.count, 2);
        assert_eq!(a.max_turn, 1);
        assert_eq!(a.max_similarity, Some(0.9));
    }

    #[test]
    fn score_combines_strength_frequency_recency() {
        let groups = rank(&[
            cite("A", 0, Some(0.8)),
            cite("A", 1, Some(0.4)),
            cite("B", 0, Some(0.4)),
        ]);
        // A: strength 1, frequency 1, recency 1
        assert_eq!(groups[0].source_name, "A");
        assert!((groups[0].score - 1.0).abs() < 1e-9);
        // B: strength 0.5, frequency 0.5, recency 0
        assert!((groups[1].score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn null_similarity_contributes_zero_strength() {
        let groups = rank(&[cite("A", 0, None), cite("B", 0, None)]);
        for g in &groups {
            assert!(g.score.is_finite());
            // frequency 1, recency 1, strength 0
            assert!((g.score - 2.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn ties_are_broken_by_identity_key() {
        let groups = rank(&[cite("Zeta", 0, Some(0.5)), cite("Alpha", 0, Some(0.5))]);
        assert_eq!(groups[0].source_name, "Alpha");
        assert_eq!(groups[1].source_name, "Zeta");
    }

    #[test]
    fn rank_is_idempotent() {
        let citations = vec![
            cite("A", 0, Some(0.3)),
            cite("B", 1, Some(0.9)),
            cite("C", 1, None),
            cite("A", 2, Some(0.6)),
        ];
        assert_eq!(rank(&citations), rank(&citations));
    }

    #[test]
    fn diff_marks_rose_fell_new() {
        let previous = vec![key("A"), key("B"), key("C")];
        let current = vec![group("B"), group("A"), group("D")];
        let changes = diff(&previous, &current);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].state, ChangeState::Rose);
        assert_eq!(changes[1].state, ChangeState::Fell);
        assert_eq!(changes[2].state, ChangeState::New);
        assert!(changes.iter().all(|c| c.key != key("E")));
    }

    #[test]
    fn diff_same_position() {
        let changes = diff(&[key("A")], &[group("A")]);
        assert_eq!(changes[0].state, ChangeState::Same);
        assert_eq!(changes[0].previous_index, Some(0));
    }

    #[test]
    fn emphasis_spans_point_four_to_one() {
        assert!((emphasis(1.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((emphasis(0.0, 1.0) - 0.4).abs() < 1e-9);
        assert!((emphasis(0.0, 0.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn indicators_match_states() {
        assert_eq!(ChangeState::Rose.indicator(), '↑');
        assert_eq!(ChangeState::Fell.indicator(), '↓');
        assert_eq!(ChangeState::Same.indicator(), '–');
        assert_eq!(ChangeState::New.indicator(), '•');
        assert_eq!(ChangeState::Same.label(), "Same position");
    }

    #[test]
    fn ledger_assigns_shared_increasing_turn_indexes() {
        let mut ledger = CitationLedger::new();
        assert_eq!(
            ledger.record_turn(vec![candidate("A", Some(0.9)), candidate("B", Some(0.8))]),
            Some(0)
        );
        assert_eq!(ledger.record_turn(vec![candidate("C", Some(0.7))]), Some(1));
        assert_eq!(ledger.record_turn(vec![]), None);
        assert_eq!(ledger.next_turn_index(), 2);
        let turns: Vec<u64> = ledger.citations().iter().map(|c| c.turn_index).collect();
        assert_eq!(turns, vec![0, 0, 1]);
    }

    #[test]
    fn first_view_marks_everything_new() {
        let mut ledger = CitationLedger::new();
        ledger.record_turn(vec![candidate("A", Some(0.9)), candidate("B", Some(0.5))]);
        let view = ledger.view();
        assert_eq!(view.entries.len(), 2);
        assert!(view.entries.iter().all(|e| e.state == ChangeState::New));
        assert!(view.removed.is_empty());
        assert!((view.entries[0].emphasis - 1.0).abs() < 1e-9);
    }

    #[test]
    fn view_diffs_against_order_before_latest_turn() {
        let mut ledger = CitationLedger::new();
        ledger.record_turn(vec![candidate("A", Some(0.9)), candidate("B", Some(0.5))]);
        // B is cited again with a high score and C appears; A drops from recency
        ledger.record_turn(vec![candidate("B", Some(0.95)), candidate("C", Some(0.6))]);

        let view = ledger.view();
        let names: Vec<&str> = view.entries.iter().map(|e| e.source_name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        assert_eq!(view.entries[0].state, ChangeState::Rose);
        assert_eq!(view.entries[1].state, ChangeState::New);
        assert_eq!(view.entries[2].state, ChangeState::Fell);
    }

    #[test]
    fn clear_reports_previous_sources_as_removed() {
        let mut ledger = CitationLedger::new();
        ledger.record_turn(vec![candidate("A", Some(0.9))]);
        ledger.clear();
        let view = ledger.view();
        assert!(view.is_empty());
        assert_eq!(view.removed.len(), 1);
        assert_eq!(view.removed[0].source_name, "A");
        assert_eq!(ledger.next_turn_index(), 0);

        ledger.reset();
        assert!(ledger.view().removed.is_empty());
    }

    #[test]
    fn candidate_key_matches_citation_key() {
        let c = candidate("A", None);
        assert_eq!(candidate_key(&c), cite("A", 0, None).key());
    }
}

//! Context-window resolution.
//!
//! Model servers report the window in several places depending on model
//! family and server version. Lookup order:
//!
//! 1. top-level `context_length`
//! 2. `model_info` keys `llama.context_length`, `gemma3.context_length`,
//!    `context_length`, then any key ending in `.context_length`
//! 3. `num_ctx <n>` in `parameters`
//! 4. `PARAMETER context_length <n>` in `modelfile`
//!
//! When none of these yield a positive number, a per-family default applies.

use std::collections::HashMap;

use lectern_core::model::ModelDetails;
use regex_lite::Regex;
use serde_json::Value;

/// Window for large-context families (`llama3`, `qwen`).
pub const LARGE_DEFAULT_WINDOW: usize = 8192;

/// Window for everything else.
pub const DEFAULT_WINDOW: usize = 4096;

const MODEL_INFO_KEYS: [&str; 3] = [
    "llama.context_length",
    "gemma3.context_length",
    "context_length",
];

const NUM_CTX_PATTERN: &str = r"(?i)num_ctx\s+(\d+)";
const MODELFILE_PATTERN: &str = r"(?i)PARAMETER\s+context_length\s+(\d+)";

/// The window reported in `details`, if any.
pub fn from_details(details: &ModelDetails) -> Option<usize> {
    if let Some(n) = details.context_length.as_ref().and_then(positive) {
        return Some(n);
    }

    for key in MODEL_INFO_KEYS {
        if let Some(n) = details.model_info.get(key).and_then(positive) {
            return Some(n);
        }
    }
    let suffixed = details
        .model_info
        .iter()
        .filter(|(k, _)| k.ends_with(".context_length"))
        .find_map(|(_, v)| positive(v));
    if suffixed.is_some() {
        return suffixed;
    }

    if let Some(n) = details
        .parameters
        .as_deref()
        .and_then(|p| capture_number(NUM_CTX_PATTERN, p))
    {
        return Some(n);
    }

    details
        .modelfile
        .as_deref()
        .and_then(|m| capture_number(MODELFILE_PATTERN, m))
}

/// Family default used when the server does not say.
pub fn default_for_model(model: &str) -> usize {
    let name = model.to_ascii_lowercase();
    if name.contains("llama3") || name.contains("qwen") {
        LARGE_DEFAULT_WINDOW
    } else {
        DEFAULT_WINDOW
    }
}

/// Resolve from details, falling back to the family default.
pub fn resolve(model: &str, details: Option<&ModelDetails>) -> usize {
    details
        .and_then(from_details)
        .unwrap_or_else(|| default_for_model(model))
}

fn positive(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 1.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (n > 0).then(|| usize::try_from(n).ok()).flatten()
}

fn capture_number(pattern: &str, text: &str) -> Option<usize> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Per-model cache of resolved windows. Cleared whenever the selected model
/// or the server URL changes.
#[derive(Debug, Default)]
pub struct ContextWindowCache {
    windows: HashMap<String, usize>,
}

impl ContextWindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str) -> Option<usize> {
        self.windows.get(model).copied()
    }

    pub fn insert(&mut self, model: impl Into<String>, window: usize) {
        self.windows.insert(model.into(), window);
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

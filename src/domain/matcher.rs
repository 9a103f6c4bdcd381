//! Trace Matcher
//!
//! Pairs each new-version trace with its most plausible old-version
//! counterpart, either by entry-point identifier similarity or via a
//! user-supplied explicit mapping.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One entry of the user-supplied matching file: the new-version trace id
/// and the old-version trace id it must be compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMatch {
    #[serde(rename = "traceInThis")]
    pub trace_in_this: String,
    #[serde(rename = "matchTo")]
    pub match_to: String,
}

/// Entry-point similarity matcher.
///
/// Entry points are assumed broadly stable across small code changes (the
/// recommended usage is test-suite-driven tracing), so normalized edit
/// distance over entry identifiers is the default pairing signal. The
/// original tool's exact threshold is not documented; 0.5 accepts pairs
/// whose identifiers share at least half their characters and is exposed
/// as a tunable.
#[derive(Debug, Clone)]
pub struct TraceMatcher {
    pub similarity_threshold: f64,
}

impl Default for TraceMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
        }
    }
}

impl TraceMatcher {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// Default algorithm: greedy best-first one-to-one pairing by normalized
    /// Levenshtein similarity between entry-point identifiers.
    ///
    /// Returns one entry per new trace: the matched old-trace index, or
    /// `None` for traces with no plausible predecessor. Tie-break is
    /// deterministic: higher similarity first, then lowest new index, then
    /// lowest old index.
    pub fn match_by_entry_points(
        &self,
        new_entries: &[String],
        old_entries: &[String],
    ) -> Vec<Option<usize>> {
        let mut result = vec![None; new_entries.len()];

        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (new_idx, new_entry) in new_entries.iter().enumerate() {
            for (old_idx, old_entry) in old_entries.iter().enumerate() {
                let score = similarity(new_entry, old_entry);
                if score >= self.similarity_threshold {
                    candidates.push((score, new_idx, old_idx));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut old_taken = vec![false; old_entries.len()];
        for (score, new_idx, old_idx) in candidates {
            if result[new_idx].is_none() && !old_taken[old_idx] {
                debug!(
                    new = %new_entries[new_idx],
                    old = %old_entries[old_idx],
                    score,
                    "matched traces by entry point"
                );
                result[new_idx] = Some(old_idx);
                old_taken[old_idx] = true;
            }
        }

        for (new_idx, slot) in result.iter().enumerate() {
            if slot.is_none() {
                warn!(
                    entry = %new_entries[new_idx],
                    "no plausible predecessor trace; left unmatched"
                );
            }
        }
        result
    }

    /// Explicit override: pair traces by id as the mapping file dictates.
    /// An entry whose old-trace id cannot be found is left unmatched, not
    /// treated as an error.
    pub fn match_with_mapping(
        &self,
        mapping: &[TraceMatch],
        new_ids: &[String],
        old_ids: &[String],
    ) -> Vec<Option<usize>> {
        let mut result = vec![None; new_ids.len()];
        for entry in mapping {
            let Some(new_idx) = new_ids.iter().position(|id| *id == entry.trace_in_this) else {
                warn!(trace = %entry.trace_in_this, "mapping names an unknown new trace");
                continue;
            };
            match old_ids.iter().position(|id| *id == entry.match_to) {
                Some(old_idx) => result[new_idx] = Some(old_idx),
                None => {
                    warn!(
                        trace = %entry.trace_in_this,
                        match_to = %entry.match_to,
                        "mapped old trace not found; left unmatched"
                    );
                }
            }
        }
        result
    }
}

/// Normalized similarity in [0, 1]: 1.0 for identical strings.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Plain two-row Levenshtein edit distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

//! Frecency: usage count weighted by how recently something was used.

mod history;

pub(crate) use history::{HistoryEntry, HistoryKind, HistoryLog, HistoryRecord};

use lumen_types::Frecency;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::utils::{DAY_MS, HOUR_MS, day_of_week, hour_of_day};

/// Recency buckets: under an hour x4, under a day x2, under a week x1, older x0.5
#[must_use]
pub fn recency_multiplier(age_ms: u64) -> f64 {
    if age_ms < HOUR_MS {
        4.0
    } else if age_ms < DAY_MS {
        2.0
    } else if age_ms < 7 * DAY_MS {
        1.0
    } else {
        0.5
    }
}

/// `count x recency_multiplier(age)`, 0 for anything never used
#[must_use]
pub fn frecency_score(count: f64, last_used: u64, now: u64) -> f64 {
    if count <= 0.0 || last_used == 0 {
        return 0.0;
    }
    count * recency_multiplier(now.saturating_sub(last_used))
}

/// What was going on when something was executed
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Query the user typed to find the item
    pub search_term: Option<String>,
    pub now: u64,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(search_term: Option<&str>, now: u64) -> Self {
        Self {
            search_term: search_term
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            now,
        }
    }

    #[cfg(test)]
    pub fn launched_from_empty(&self) -> bool {
        self.search_term.is_none()
    }
}

/// Move `term` to the front of a most-recent-first list capped at `max`
pub fn remember_term(terms: &mut Vec<String>, term: &str, max: usize) {
    terms.retain(|t| !t.eq_ignore_ascii_case(term));
    terms.insert(0, term.to_string());
    terms.truncate(max);
}

/// Count one execution on an item's counters
pub fn record_usage(frecency: &mut Frecency, context: &ExecutionContext, max_terms: usize) {
    frecency.count += 1;
    frecency.last_used = context.now;
    frecency.hour_slot_counts[hour_of_day(context.now)] += 1;
    frecency.day_of_week_counts[day_of_week(context.now)] += 1;

    match &context.search_term {
        Some(term) => remember_term(&mut frecency.recent_search_terms, term, max_terms),
        None => frecency.launch_from_empty_count += 1,
    }
}

/// How a query relates to the text it matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Query equals a learned search term
    Exact,
    Prefix,
    Fuzzy,
}

impl MatchType {
    /// Classify a match. Only learned terms can be `Exact`.
    #[must_use]
    pub fn classify(query: &str, text: &str, is_learned_term: bool) -> Self {
        let query = query.to_lowercase();
        let text = text.to_lowercase();
        if is_learned_term && query == text {
            Self::Exact
        } else if text.starts_with(&query) {
            Self::Prefix
        } else {
            Self::Fuzzy
        }
    }
}

/// Ordering inputs for one ranked row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankKey {
    pub match_type: MatchType,
    /// Fuzzy score plus additive boosts
    pub score: f64,
    pub frecency: f64,
}

impl RankKey {
    /// Best first. EXACT beats everything else; among EXACT rows frecency
    /// decides and score breaks ties; among the rest it is the other way round.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let a_exact = self.match_type == MatchType::Exact;
        let b_exact = other.match_type == MatchType::Exact;
        match (a_exact, b_exact) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => other
                .frecency
                .total_cmp(&self.frecency)
                .then_with(|| other.score.total_cmp(&self.score)),
            (false, false) => other
                .score
                .total_cmp(&self.score)
                .then_with(|| other.frecency.total_cmp(&self.frecency)),
        }
    }
}

/// Damp each source's Nth row by `decay^N` (in current order), re-sort, then
/// keep at most `max_per_source` rows per source when that is non-zero.
///
/// With the default 0.7 a source's rows are scaled by 1, 0.7, 0.49, 0.343, ...
// Position is usize, powi needs i32, bounded by result count
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn apply_diversity_decay<T, F>(
    rows: &mut Vec<(T, RankKey)>,
    source_of: F,
    decay: f64,
    max_per_source: usize,
) where
    F: Fn(&T) -> &str,
{
    if rows.is_empty() {
        return;
    }

    let mut positions: HashMap<String, usize> = HashMap::new();
    for (row, key) in rows.iter_mut() {
        let position = positions.entry(source_of(row).to_string()).or_insert(0);
        key.score *= decay.powi(*position as i32);
        *position += 1;
    }

    rows.sort_by(|a, b| a.1.compare(&b.1));

    if max_per_source > 0 {
        let mut counts: HashMap<String, usize> = HashMap::new();
        rows.retain(|(row, _)| {
            let count = counts.entry(source_of(row).to_string()).or_insert(0);
            *count += 1;
            *count <= max_per_source
        });
    }
}

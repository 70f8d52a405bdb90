//! Orders global matches: boosts, dedup, match-type ordering, diversity.

use std::collections::HashMap;

use super::{SearchEngine, Searchable, SearchableSource};
use crate::config::SearchConfig;
use crate::frecency::{MatchType, RankKey, apply_diversity_decay, frecency_score};

/// Extra score for a plugin's own entry so "calc" finds the Calculator plugin
/// ahead of items that merely contain the letters
pub const PLUGIN_ENTRY_BONUS: f64 = 150.0;

#[derive(Debug, Clone)]
pub struct RankingParams {
    pub history_term_boost: f64,
    pub history_term_prefix_boost: f64,
    pub plugin_bonus: HashMap<String, f64>,
    pub diversity_decay: f64,
    pub max_per_plugin: usize,
    pub limit: usize,
}

impl From<&SearchConfig> for RankingParams {
    fn from(config: &SearchConfig) -> Self {
        Self {
            history_term_boost: config.history_term_boost,
            history_term_prefix_boost: config.history_term_prefix_boost,
            plugin_bonus: config.plugin_ranking_bonus.clone(),
            diversity_decay: config.diversity_decay,
            max_per_plugin: config.max_results_per_plugin,
            limit: config.max_displayed_results,
        }
    }
}

impl Default for RankingParams {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

/// A ranked searchable with the key it was ordered by
#[derive(Debug, Clone)]
pub struct RankedHit<'a> {
    pub searchable: &'a Searchable,
    pub key: RankKey,
}

fn boosted_score(
    query: &str,
    searchable: &Searchable,
    raw: f64,
    match_type: MatchType,
    params: &RankingParams,
) -> f64 {
    let mut score = raw;

    if searchable.is_history_term {
        score += match match_type {
            MatchType::Exact => params.history_term_boost,
            MatchType::Prefix => params.history_term_prefix_boost,
            MatchType::Fuzzy => 0.0,
        };
    } else {
        score += SearchEngine::name_match_bonus(query, &searchable.name);
    }

    if searchable.source == SearchableSource::Plugin {
        score += PLUGIN_ENTRY_BONUS;
    }
    score + params.plugin_bonus.get(&searchable.plugin_id).copied().unwrap_or(0.0)
}

/// Match, boost, merge duplicates, order, damp repeated sources, and cut to
/// the display limit
pub fn rank<'a>(
    engine: &mut SearchEngine,
    query: &str,
    searchables: &'a [Searchable],
    params: &RankingParams,
    now: u64,
) -> Vec<RankedHit<'a>> {
    let matches = engine.search(query, searchables);

    let mut hits: Vec<RankedHit<'a>> = Vec::with_capacity(matches.len());
    let mut positions: HashMap<(SearchableSource, &'a str, &'a str), usize> = HashMap::new();

    for m in matches {
        let searchable = m.searchable;
        let match_type = MatchType::classify(query, &searchable.name, searchable.is_history_term);
        let key = RankKey {
            match_type,
            score: boosted_score(query, searchable, m.score, match_type, params),
            frecency: frecency_score(searchable.count, searchable.last_used, now),
        };

        match positions.get(&searchable.key()) {
            Some(&i) => {
                let existing = &mut hits[i];
                existing.key.score = existing.key.score.max(key.score);
                if key.match_type == MatchType::Exact {
                    existing.key.match_type = MatchType::Exact;
                }
                // Keep the display entry, not the learned-term twin
                if existing.searchable.is_history_term && !searchable.is_history_term {
                    existing.searchable = searchable;
                }
            }
            None => {
                positions.insert(searchable.key(), hits.len());
                hits.push(RankedHit { searchable, key });
            }
        }
    }

    hits.sort_by(|a, b| a.key.compare(&b.key));

    let mut rows: Vec<(&'a Searchable, RankKey)> =
        hits.into_iter().map(|h| (h.searchable, h.key)).collect();
    apply_diversity_decay(
        &mut rows,
        |s| s.plugin_id.as_str(),
        params.diversity_decay,
        params.max_per_plugin,
    );

    rows.into_iter()
        .take(params.limit)
        .map(|(searchable, key)| RankedHit { searchable, key })
        .collect()
}

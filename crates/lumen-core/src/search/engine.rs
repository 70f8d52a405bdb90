use super::{SearchMatch, Searchable};
use nucleo_matcher::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32Str};
use tracing::trace;

const KEYWORD_WEIGHT: f64 = 0.3;

/// Fuzzy matcher over the global search space
pub struct SearchEngine {
    matcher: Matcher,
}

impl SearchEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            matcher: Matcher::new(Config::DEFAULT),
        }
    }

    /// Every searchable the query matches, with its raw fuzzy score
    /// (name score plus a weighted keyword score). Unordered.
    pub fn search<'a>(
        &mut self,
        query: &str,
        searchables: &'a [Searchable],
    ) -> Vec<SearchMatch<'a>> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let pattern = Pattern::new(
            query,
            CaseMatching::Smart,
            Normalization::Smart,
            AtomKind::Fuzzy,
        );

        let mut buf = Vec::new();
        let results: Vec<SearchMatch<'a>> = searchables
            .iter()
            .filter_map(|s| self.score_searchable(&pattern, s, &mut buf))
            .collect();

        trace!("'{}' matched {} of {}", query, results.len(), searchables.len());
        results
    }

    fn score_searchable<'a>(
        &mut self,
        pattern: &Pattern,
        searchable: &'a Searchable,
        buf: &mut Vec<char>,
    ) -> Option<SearchMatch<'a>> {
        let name_score = pattern.score(Utf32Str::new(&searchable.name, buf), &mut self.matcher);

        let keyword_score = if searchable.keywords.is_empty() {
            None
        } else {
            let keywords_text = searchable.keywords.join(" ");
            pattern.score(Utf32Str::new(&keywords_text, buf), &mut self.matcher)
        };

        // Learned terms only count when the term itself matches
        if searchable.is_history_term && name_score.is_none() {
            return None;
        }

        let score = match (name_score, keyword_score) {
            (None, None) => return None,
            (name, keyword) => {
                f64::from(name.unwrap_or(0)) + f64::from(keyword.unwrap_or(0)) * KEYWORD_WEIGHT
            }
        };

        Some(SearchMatch { searchable, score })
    }

    /// Bonus for names the query equals (+500) or starts (+250 to +500 by
    /// how much of the name it covers)
    // String lengths are usize, coverage ratio uses f64 for precision
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn name_match_bonus(query: &str, name: &str) -> f64 {
        let query_lower = query.to_lowercase();
        let name_lower = name.to_lowercase();

        if query_lower == name_lower {
            return 500.0;
        }

        if !name_lower.is_empty() && name_lower.starts_with(&query_lower) {
            let coverage = query_lower.chars().count() as f64 / name_lower.chars().count() as f64;
            return 250.0 + (coverage * 250.0);
        }

        0.0
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // Exact float comparisons are intentional in tests
mod tests {
    use super::*;
    use crate::search::SearchableSource;

    fn make_searchable(id: &str, name: &str, keywords: Vec<&str>) -> Searchable {
        Searchable::new(SearchableSource::IndexedItem, "apps", id, name)
            .with_keywords(keywords.into_iter().map(String::from).collect())
    }

    #[test]
    fn test_basic_search() {
        let mut engine = SearchEngine::new();
        let searchables = vec![
            make_searchable("firefox", "Firefox", vec!["browser", "web"]),
            make_searchable("chrome", "Chrome", vec!["browser", "web"]),
            make_searchable("vscode", "Visual Studio Code", vec!["editor", "code"]),
        ];

        let results = engine.search("fire", &searchables);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].searchable.id, "firefox");
    }

    #[test]
    fn test_keyword_only_match() {
        let mut engine = SearchEngine::new();
        let searchables = vec![
            make_searchable("firefox", "Firefox", vec!["browser", "web"]),
            make_searchable("notepad", "Notepad", vec!["editor", "text"]),
        ];

        let results = engine.search("browser", &searchables);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].searchable.id, "firefox");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_history_term_needs_term_match() {
        let mut engine = SearchEngine::new();
        let base = make_searchable("firefox", "Firefox", vec!["browser"]);
        let searchables = vec![base.history_term("ff")];

        assert!(engine.search("browser", &searchables).is_empty());
        assert_eq!(engine.search("ff", &searchables).len(), 1);
    }

    #[test]
    fn test_empty_and_blank_query() {
        let mut engine = SearchEngine::new();
        let searchables = vec![make_searchable("test", "Test", vec![])];
        assert!(engine.search("", &searchables).is_empty());
        assert!(engine.search("   ", &searchables).is_empty());
    }

    #[test]
    fn test_very_long_query() {
        let mut engine = SearchEngine::new();
        let searchables = vec![make_searchable("test", "Test Application", vec![])];
        assert!(engine.search(&"a".repeat(1000), &searchables).is_empty());
    }

    #[test]
    fn test_name_match_bonus() {
        assert_eq!(SearchEngine::name_match_bonus("FIREFOX", "firefox"), 500.0);
        assert_eq!(SearchEngine::name_match_bonus("fire", "Firefox"), 250.0 + 4.0 / 7.0 * 250.0);
        assert_eq!(SearchEngine::name_match_bonus("fox", "Firefox"), 0.0);
        assert_eq!(SearchEngine::name_match_bonus("fire", ""), 0.0);
        assert_eq!(SearchEngine::name_match_bonus("firefox browser", "fire"), 0.0);
    }
}

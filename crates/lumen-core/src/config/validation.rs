//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Warn about keys in a config file that no setting reads.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    for path in find_unknown_keys(&value, &expected_keys(), "") {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Paths like "search.typoField" for keys not in `expected`
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };

    let mut unknowns = Vec::new();
    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if !expected.fields.contains(key.as_str()) {
            unknowns.push(path);
        }
    }
    unknowns
}

struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }
}

fn expected_keys() -> ExpectedKeys {
    let search = ExpectedKeys::new(&[
        "maxDisplayedResults",
        "maxRecentItems",
        "maxResultsPerPlugin",
        "diversityDecay",
        "engineBaseUrl",
        "historyTermBoost",
        "historyTermPrefixBoost",
        "pluginRankingBonus",
    ]);
    let daemon = ExpectedKeys::new(&[
        "restartDelayMs",
        "defaultMaxRestarts",
        "socketConnectTimeoutMs",
        "stableUptimeMs",
    ]);
    let persistence = ExpectedKeys::new(&["flushIntervalMs"]);
    let history = ExpectedKeys::new(&["scoreCeiling", "maxAgeDays", "maxSearchTerms"]);
    let navigation = ExpectedKeys::new(&["doubleEscapeMs", "sliderSettleMs"]);

    ExpectedKeys::new(&[])
        .with_nested("search", search)
        .with_nested("daemon", daemon)
        .with_nested("persistence", persistence)
        .with_nested("history", history)
        .with_nested("navigation", navigation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unknowns(json: &str) -> Vec<String> {
        let value: Value = serde_json::from_str(json).unwrap();
        find_unknown_keys(&value, &expected_keys(), "")
    }

    #[test]
    fn test_known_fields_produce_no_warnings() {
        let found = unknowns(
            r#"{"search": {"diversityDecay": 0.5}, "navigation": {"doubleEscapeMs": 250}}"#,
        );
        assert!(found.is_empty(), "Expected no unknowns, got: {found:?}");
    }

    #[test]
    fn test_unknown_top_level_and_nested_fields() {
        let mut found = unknowns(r#"{"themes": {}, "daemon": {"restartDelay": 5}}"#);
        found.sort();
        assert_eq!(found, vec!["daemon.restartDelay", "themes"]);
    }

    #[test]
    fn test_plugin_ranking_bonus_keys_are_free_form() {
        // Map values are leaves, their keys are plugin ids
        let found = unknowns(r#"{"search": {"pluginRankingBonus": {"apps": 1}}}"#);
        assert!(found.is_empty());
    }
}

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration (config.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub navigation: NavigationSettings,
}

impl Config {
    /// Load config from file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_displayed_results: usize,

    /// Rows shown for an empty query
    #[serde(default = "default_max_recent")]
    pub max_recent_items: usize,

    /// Hard cap per plugin in the global list (0 = no cap)
    #[serde(default)]
    pub max_results_per_plugin: usize,

    #[serde(default = "default_diversity_decay")]
    pub diversity_decay: f64,

    #[serde(default = "default_engine_url")]
    pub engine_base_url: String,

    /// Boost added when the query equals a learned search term
    #[serde(default = "default_history_term_boost")]
    pub history_term_boost: f64,

    /// Boost added when the query is a prefix of a learned search term
    #[serde(default = "default_history_term_prefix_boost")]
    pub history_term_prefix_boost: f64,

    /// Per-plugin additive bonus, e.g. {"apps": 200}
    #[serde(default)]
    pub plugin_ranking_bonus: HashMap<String, f64>,
}

fn default_max_results() -> usize {
    16
}
fn default_max_recent() -> usize {
    20
}
fn default_diversity_decay() -> f64 {
    0.7
}
fn default_engine_url() -> String {
    "https://duckduckgo.com/?q=".to_string()
}
fn default_history_term_boost() -> f64 {
    600.0
}
fn default_history_term_prefix_boost() -> f64 {
    300.0
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_displayed_results: default_max_results(),
            max_recent_items: default_max_recent(),
            max_results_per_plugin: 0,
            diversity_decay: default_diversity_decay(),
            engine_base_url: default_engine_url(),
            history_term_boost: default_history_term_boost(),
            history_term_prefix_boost: default_history_term_prefix_boost(),
            plugin_ranking_bonus: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSettings {
    /// Fixed delay before restarting a crashed daemon
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    /// Used when a manifest sets `restartOnCrash` without `maxRestarts`
    #[serde(default = "default_max_restarts")]
    pub default_max_restarts: u32,

    /// How long to wait for a socket handler to start listening
    #[serde(default = "default_socket_timeout")]
    pub socket_connect_timeout_ms: u64,

    /// A daemon that stays up this long has its crash count cleared
    #[serde(default = "default_stable_uptime")]
    pub stable_uptime_ms: u64,
}

fn default_restart_delay() -> u64 {
    1000
}
fn default_max_restarts() -> u32 {
    5
}
fn default_socket_timeout() -> u64 {
    3000
}
fn default_stable_uptime() -> u64 {
    60_000
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay(),
            default_max_restarts: default_max_restarts(),
            socket_connect_timeout_ms: default_socket_timeout(),
            stable_uptime_ms: default_stable_uptime(),
        }
    }
}

impl DaemonSettings {
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    #[must_use]
    pub fn stable_uptime(&self) -> Duration {
        Duration::from_millis(self.stable_uptime_ms)
    }

    #[must_use]
    pub fn socket_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSettings {
    /// At most one index/history write per interval
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

fn default_flush_interval() -> u64 {
    1000
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval(),
        }
    }
}

impl PersistenceSettings {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySettings {
    /// Total count above which every entry is scaled down
    #[serde(default = "default_score_ceiling")]
    pub score_ceiling: f64,

    /// Entries older than this with a count below 1 are dropped
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// Learned search terms kept per item
    #[serde(default = "default_max_search_terms")]
    pub max_search_terms: usize,
}

fn default_score_ceiling() -> f64 {
    1000.0
}
fn default_max_age_days() -> u64 {
    90
}
fn default_max_search_terms() -> usize {
    10
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            score_ceiling: default_score_ceiling(),
            max_age_days: default_max_age_days(),
            max_search_terms: default_max_search_terms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSettings {
    /// Two escapes within this window close the plugin outright
    #[serde(default = "default_double_escape")]
    pub double_escape_ms: u64,

    /// Only the last slider value within this window is sent
    #[serde(default = "default_slider_settle")]
    pub slider_settle_ms: u64,
}

fn default_double_escape() -> u64 {
    300
}
fn default_slider_settle() -> u64 {
    150
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            double_escape_ms: default_double_escape(),
            slider_settle_ms: default_slider_settle(),
        }
    }
}

impl NavigationSettings {
    #[must_use]
    pub fn double_escape(&self) -> Duration {
        Duration::from_millis(self.double_escape_ms)
    }

    #[must_use]
    pub fn slider_settle(&self) -> Duration {
        Duration::from_millis(self.slider_settle_ms)
    }
}

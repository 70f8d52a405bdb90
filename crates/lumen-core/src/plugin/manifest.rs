use lumen_types::{InputMode, ResultItem};
use serde::{Deserialize, Serialize};

/// Plugin manifest (manifest.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    /// Values: "*", "linux", "macos", ...
    #[serde(default)]
    pub supported_platforms: Vec<String>,

    /// Typing this at the start of the query opens the plugin
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub handler: Option<Handler>,

    #[serde(default)]
    pub daemon: Option<DaemonConfig>,

    #[serde(default)]
    pub index: Option<IndexConfig>,

    #[serde(default, rename = "match")]
    pub match_config: Option<MatchConfig>,

    #[serde(default)]
    pub frecency: FrecencyMode,

    /// Items ingested at load time without a handler round-trip
    #[serde(default)]
    pub static_index: Vec<ResultItem>,

    /// Contributes index items only; never listed as an openable plugin
    #[serde(default)]
    pub index_only: bool,

    #[serde(default)]
    pub input_mode: Option<InputMode>,

    #[serde(default)]
    pub hidden: bool,

    /// Interval in ms for `poll` steps while the plugin is open
    #[serde(default)]
    pub poll: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerType {
    /// Line-delimited JSON over stdin/stdout
    #[default]
    Stdio,
    /// JSON-RPC over a Unix socket the handler listens on
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handler {
    #[serde(default, rename = "type")]
    pub handler_type: HandlerType,

    /// Executable relative to the plugin directory
    #[serde(default)]
    pub path: Option<String>,

    /// Program and arguments, split on whitespace (no shell)
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Started at launch and kept alive across plugin close
    #[serde(default)]
    pub background: bool,

    #[serde(default)]
    pub restart_on_crash: bool,

    /// 0 means unlimited; absent falls back to the configured default
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Frecency tracking mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrecencyMode {
    /// Track individual item usage
    #[default]
    Item,
    /// Track plugin usage only
    Plugin,
    /// Don't track frecency
    None,
}

/// Regex patterns that trigger a `match` step from the global query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub priority: i32,
}

impl Manifest {
    #[must_use]
    pub fn handler_type(&self) -> HandlerType {
        self.handler
            .as_ref()
            .map(|h| h.handler_type)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_daemon(&self) -> bool {
        self.daemon.as_ref().is_some_and(|d| d.enabled)
    }

    #[must_use]
    pub fn is_background_daemon(&self) -> bool {
        self.daemon.as_ref().is_some_and(|d| d.enabled && d.background)
    }

    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.index.as_ref().is_some_and(|i| i.enabled)
    }

    /// Platforms must be listed explicitly; "*" matches all
    #[must_use]
    pub fn supports_platform(&self, platform: &str) -> bool {
        self.supported_platforms
            .iter()
            .any(|p| p == "*" || p.eq_ignore_ascii_case(platform))
    }
}

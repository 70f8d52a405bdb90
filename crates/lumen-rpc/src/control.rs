//! Control-socket methods understood by `lumen-daemon`.

use lumen_types::PluginStatus;
use serde::{Deserialize, Serialize};

pub const SHOW: &str = "show";
pub const TOGGLE: &str = "toggle";
pub const OPEN_PLUGIN: &str = "open_plugin";
pub const UPDATE_STATUS: &str = "update_status";
pub const REINDEX: &str = "reindex";
pub const STATUS: &str = "status";
pub const RELOAD_PLUGINS: &str = "reload_plugins";
pub const SHUTDOWN: &str = "shutdown";
/// Start receiving [`CORE_UPDATE`] notifications on this connection
pub const SUBSCRIBE: &str = "subscribe";
/// Forward a `CoreEvent` from a front end
pub const EVENT: &str = "event";

/// Notification method the daemon uses to push `CoreUpdate`s to subscribers
pub const CORE_UPDATE: &str = "core_update";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPluginParams {
    pub plugin_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusParams {
    pub plugin_id: String,
    pub status: PluginStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexParams {
    pub plugin_id: String,
    /// `full` or `incremental`; the plugin decides when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Result of [`RELOAD_PLUGINS`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReloadSummary {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub updated: Vec<String>,
}

/// Snapshot returned by [`STATUS`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub plugin_count: usize,
    pub indexed_items: usize,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub history_entries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_plugin: Option<String>,
    #[serde(default)]
    pub running_daemons: Vec<String>,
    #[serde(default)]
    pub unavailable_plugins: Vec<String>,
}

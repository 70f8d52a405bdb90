//! Per-plugin item indexes with embedded frecency counters.

mod persist;
mod store;

pub(crate) use persist::WriteCoalescer;
pub(crate) use store::IndexStore;

use lumen_types::{Frecency, ResultItem};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Reserved id of the virtual item carrying plugin-level usage
pub(crate) const PLUGIN_ENTRY_ID: &str = "__plugin__";

pub(crate) const CACHE_VERSION: u32 = 1;

/// Index data for a single plugin
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct PluginIndex {
    #[serde(default)]
    pub items: Vec<IndexedItem>,

    #[serde(default, rename = "lastIndexed")]
    pub last_indexed: u64,
}

/// An index item with its usage counters.
///
/// On disk the counters sit next to the item fields under their underscore
/// names, so a cache file reads as plain items with extra `_count` etc.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct IndexedItem {
    #[serde(flatten)]
    pub item: ResultItem,

    #[serde(flatten)]
    pub frecency: Frecency,

    /// Declared in the manifest rather than produced by the handler
    #[serde(rename = "_static", default, skip_serializing_if = "is_false")]
    pub is_static: bool,
}

// Serde skip_serializing_if requires &bool signature
#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl<'de> Deserialize<'de> for IndexedItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl IndexedItem {
    pub(crate) fn new(item: ResultItem) -> Self {
        Self {
            item,
            frecency: Frecency::default(),
            is_static: false,
        }
    }

    /// Split a flat JSON object into item fields and counters.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the object is not a valid item.
    pub(crate) fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        let is_static = value
            .get("_static")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let frecency: Frecency = serde_json::from_value(value.clone()).unwrap_or_default();
        let item: ResultItem = serde_json::from_value(value)?;
        Ok(Self {
            item,
            frecency,
            is_static,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.item.id
    }

    pub(crate) fn is_plugin_entry(&self) -> bool {
        self.item.id == PLUGIN_ENTRY_ID
    }

    /// Handler-provided items, as opposed to static and virtual entries
    pub(crate) fn is_dynamic(&self) -> bool {
        !self.is_static && !self.is_plugin_entry()
    }
}

/// On-disk cache file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexCache {
    pub version: u32,

    #[serde(rename = "savedAt", default)]
    pub saved_at: u64,

    #[serde(default)]
    pub indexes: HashMap<String, PluginIndex>,
}

/// Index store summary for status reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub plugin_count: usize,
    pub item_count: usize,
    pub items_with_frecency: usize,
}

/// Write through a temp file and rename, so readers never see a partial file
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

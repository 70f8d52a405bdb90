use super::{CACHE_VERSION, IndexCache, IndexStats, IndexedItem, PLUGIN_ENTRY_ID, PluginIndex};
use crate::frecency::{ExecutionContext, record_usage};
use crate::plugin::{FrecencyMode, IndexMode, Plugin};
use crate::utils::now_millis;
use crate::{Error, Result};
use lumen_types::ResultItem;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Owns every plugin's indexed items
#[derive(Debug, Default)]
pub(crate) struct IndexStore {
    indexes: HashMap<String, PluginIndex>,
    dirty: bool,
    /// Bumped on every mutation so derived search spaces can tell they are stale
    generation: u64,
}

impl IndexStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Load the cache. A missing, unreadable or corrupt file yields an empty store.
    pub(crate) fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Index cache not found at {}", path.display());
                return Self::new();
            }
            Err(e) => {
                warn!("Failed to read index cache {}: {}", path.display(), e);
                return Self::new();
            }
        };

        let cache: IndexCache = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Failed to parse index cache: {} (at line {}, column {})",
                    e,
                    e.line(),
                    e.column()
                );
                return Self::new();
            }
        };

        if cache.version != CACHE_VERSION {
            warn!(
                "Ignoring index cache version {} (expected {})",
                cache.version, CACHE_VERSION
            );
            return Self::new();
        }

        let store = Self {
            indexes: cache.indexes,
            dirty: false,
            generation: 0,
        };
        let stats = store.stats();
        info!(
            "Loaded {} plugin indexes from cache ({} total items, {} with frecency)",
            stats.plugin_count, stats.item_count, stats.items_with_frecency
        );
        store
    }

    /// Write the cache if anything changed since the last save.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub(crate) fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let cache = IndexCache {
            version: CACHE_VERSION,
            saved_at: now_millis(),
            indexes: self.indexes.clone(),
        };
        super::write_atomic(path, &serde_json::to_string(&cache)?)?;
        self.dirty = false;

        debug!("Saved {} plugin indexes to cache", self.indexes.len());
        Ok(())
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace a plugin's manifest-declared items. Counters survive by id.
    pub(crate) fn ingest_static(&mut self, plugin_id: &str, items: &[ResultItem]) {
        let index = self.indexes.entry(plugin_id.to_string()).or_default();
        let mut previous: HashMap<String, IndexedItem> = HashMap::new();
        index.items.retain(|i| {
            if i.is_static {
                previous.insert(i.item.id.clone(), i.clone());
                false
            } else {
                true
            }
        });

        // A handler item with the same id takes the place of the static one
        let indexed_ids: HashSet<String> =
            index.items.iter().map(|i| i.item.id.clone()).collect();
        let mut changed = false;
        for item in items.iter().filter(|i| !indexed_ids.contains(&i.id)) {
            let mut indexed = IndexedItem::new(item.clone());
            indexed.is_static = true;
            match previous.remove(&item.id) {
                Some(old) => {
                    changed |= old.item != *item;
                    indexed.frecency = old.frecency;
                }
                None => changed = true,
            }
            index.items.push(indexed);
        }
        changed |= !previous.is_empty();

        if changed {
            debug!("[{}] Ingested {} static items", plugin_id, items.len());
            self.touch();
        }
    }

    /// Apply an `index` response. The payload is validated first; an invalid
    /// payload leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIndex` for items with an empty or reserved id or
    /// an empty name.
    pub(crate) fn apply_index(
        &mut self,
        plugin_id: &str,
        mode: IndexMode,
        items: Vec<ResultItem>,
        remove: &[String],
    ) -> Result<usize> {
        validate_items(plugin_id, &items)?;
        let count = items.len();

        match mode {
            IndexMode::Full => self.update_full(plugin_id, items),
            IndexMode::Incremental => self.update_incremental(plugin_id, items, remove),
        }

        info!(
            "[{}] Indexed {} items ({:?}, {} removed)",
            plugin_id,
            count,
            mode,
            remove.len()
        );
        Ok(count)
    }

    fn update_full(&mut self, plugin_id: &str, items: Vec<ResultItem>) {
        let index = self.indexes.entry(plugin_id.to_string()).or_default();

        let incoming: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let mut previous: HashMap<String, IndexedItem> = HashMap::new();
        index.items.retain(|i| {
            if i.is_dynamic() || (i.is_static && incoming.contains(i.id())) {
                previous.insert(i.item.id.clone(), i.clone());
                false
            } else {
                true
            }
        });

        for item in items {
            let mut indexed = IndexedItem::new(item);
            if let Some(old) = previous.remove(indexed.id()) {
                indexed.frecency = old.frecency;
            }
            index.items.push(indexed);
        }
        index.last_indexed = now_millis();
        self.touch();
    }

    fn update_incremental(&mut self, plugin_id: &str, items: Vec<ResultItem>, remove: &[String]) {
        let index = self.indexes.entry(plugin_id.to_string()).or_default();

        let remove_set: HashSet<&str> = remove.iter().map(String::as_str).collect();
        index
            .items
            .retain(|i| i.is_plugin_entry() || !remove_set.contains(i.id()));

        for item in items {
            match index.items.iter_mut().find(|i| i.id() == item.id) {
                Some(existing) => {
                    existing.item = merge_item(&existing.item, item);
                    existing.is_static = false;
                }
                None => index.items.push(IndexedItem::new(item)),
            }
        }
        index.last_indexed = now_millis();
        self.touch();
    }

    /// Record an execution according to the plugin's frecency mode.
    /// Returns whether anything was counted.
    pub(crate) fn record_execution(
        &mut self,
        plugin: &Plugin,
        item_id: Option<&str>,
        context: &ExecutionContext,
        max_terms: usize,
    ) -> bool {
        match plugin.manifest.frecency {
            FrecencyMode::None => false,
            FrecencyMode::Plugin => {
                self.record_plugin_usage(plugin, context, max_terms);
                true
            }
            FrecencyMode::Item => match item_id {
                Some(id) if id != PLUGIN_ENTRY_ID => {
                    self.record_item_usage(&plugin.id, id, context, max_terms)
                }
                _ => {
                    self.record_plugin_usage(plugin, context, max_terms);
                    true
                }
            },
        }
    }

    fn record_item_usage(
        &mut self,
        plugin_id: &str,
        item_id: &str,
        context: &ExecutionContext,
        max_terms: usize,
    ) -> bool {
        let Some(item) = self
            .indexes
            .get_mut(plugin_id)
            .and_then(|idx| idx.items.iter_mut().find(|i| i.id() == item_id))
        else {
            debug!("[{}] Not counting unindexed item {}", plugin_id, item_id);
            return false;
        };
        record_usage(&mut item.frecency, context, max_terms);
        debug!(
            "[{}] Recorded execution of {} (count {})",
            plugin_id, item_id, item.frecency.count
        );
        self.touch();
        true
    }

    /// Count a use of the plugin itself on its virtual entry
    pub(crate) fn record_plugin_usage(
        &mut self,
        plugin: &Plugin,
        context: &ExecutionContext,
        max_terms: usize,
    ) {
        if plugin.manifest.frecency == FrecencyMode::None {
            return;
        }
        let index = self.indexes.entry(plugin.id.clone()).or_default();
        let position = match index.items.iter().position(IndexedItem::is_plugin_entry) {
            Some(p) => p,
            None => {
                index.items.push(IndexedItem::new(ResultItem {
                    id: PLUGIN_ENTRY_ID.to_string(),
                    name: plugin.manifest.name.clone(),
                    ..Default::default()
                }));
                index.items.len() - 1
            }
        };
        record_usage(&mut index.items[position].frecency, context, max_terms);
        self.touch();
    }

    pub(crate) fn get(&self, plugin_id: &str, item_id: &str) -> Option<&IndexedItem> {
        self.indexes
            .get(plugin_id)?
            .items
            .iter()
            .find(|i| i.id() == item_id)
    }

    pub(crate) fn plugin_entry(&self, plugin_id: &str) -> Option<&IndexedItem> {
        self.get(plugin_id, PLUGIN_ENTRY_ID)
    }

    /// Items of one plugin, virtual entry excluded
    pub(crate) fn items(&self, plugin_id: &str) -> impl Iterator<Item = &IndexedItem> {
        self.indexes
            .get(plugin_id)
            .into_iter()
            .flat_map(|idx| idx.items.iter())
            .filter(|i| !i.is_plugin_entry())
    }

    /// Ids of handler-provided items, sent back on incremental reindex
    pub(crate) fn item_ids(&self, plugin_id: &str) -> Vec<String> {
        self.items(plugin_id)
            .filter(|i| !i.is_static)
            .map(|i| i.item.id.clone())
            .collect()
    }

    pub(crate) fn plugin_ids(&self) -> impl Iterator<Item = &String> {
        self.indexes.keys()
    }

    pub(crate) fn contains(&self, plugin_id: &str, item_id: &str) -> bool {
        self.get(plugin_id, item_id).is_some()
    }

    /// Drop a plugin's index (plugin uninstalled)
    pub(crate) fn remove_plugin(&mut self, plugin_id: &str) {
        if self.indexes.remove(plugin_id).is_some() {
            debug!("[{}] Dropped index", plugin_id);
            self.touch();
        }
    }

    pub(crate) fn stats(&self) -> IndexStats {
        let items = self
            .indexes
            .values()
            .flat_map(|p| p.items.iter())
            .filter(|i| !i.is_plugin_entry());
        let (item_count, items_with_frecency) = items.fold((0, 0), |(n, f), i| {
            (n + 1, f + usize::from(i.frecency.has_usage()))
        });
        IndexStats {
            plugin_count: self.indexes.len(),
            item_count,
            items_with_frecency,
        }
    }
}

fn validate_items(plugin_id: &str, items: &[ResultItem]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        if item.id.trim().is_empty() {
            return Err(Error::InvalidIndex(format!(
                "[{plugin_id}] item {i} has an empty id"
            )));
        }
        if item.id == PLUGIN_ENTRY_ID {
            return Err(Error::InvalidIndex(format!(
                "[{plugin_id}] item {i} uses reserved id {PLUGIN_ENTRY_ID}"
            )));
        }
        if item.name.trim().is_empty() {
            return Err(Error::InvalidIndex(format!(
                "[{plugin_id}] item '{}' has an empty name",
                item.id
            )));
        }
    }
    Ok(())
}

/// Overlay the fields a new item carries onto the old one
fn merge_item(old: &ResultItem, new: ResultItem) -> ResultItem {
    let (Ok(Value::Object(mut base)), Ok(Value::Object(overlay))) =
        (serde_json::to_value(old), serde_json::to_value(&new))
    else {
        return new;
    };
    base.extend(overlay);
    serde_json::from_value(Value::Object(base)).unwrap_or(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Manifest;
    use std::path::PathBuf;

    const NOW: u64 = 1_700_000_000_000;

    fn item(id: &str, name: &str) -> ResultItem {
        ResultItem {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn plugin(mode: FrecencyMode) -> Plugin {
        let mut manifest: Manifest =
            serde_json::from_value(serde_json::json!({"name": "Apps"})).unwrap();
        manifest.frecency = mode;
        manifest.static_index = vec![item("static", "Static")];
        Plugin::from_manifest("apps".to_string(), PathBuf::from("/tmp"), manifest, true).unwrap()
    }

    fn ids(store: &IndexStore, plugin_id: &str) -> Vec<String> {
        store.items(plugin_id).map(|i| i.item.id.clone()).collect()
    }

    #[test]
    fn full_replace_keeps_frecency_by_id() {
        let mut store = IndexStore::new();
        store
            .apply_index("apps", IndexMode::Full, vec![item("a", "A"), item("b", "B")], &[])
            .unwrap();
        let ctx = ExecutionContext::new(Some("aa"), NOW);
        assert!(store.record_item_usage("apps", "a", &ctx, 10));

        store
            .apply_index("apps", IndexMode::Full, vec![item("a", "A2"), item("c", "C")], &[])
            .unwrap();

        assert_eq!(ids(&store, "apps"), vec!["a", "c"]);
        let a = store.get("apps", "a").unwrap();
        assert_eq!(a.item.name, "A2");
        assert_eq!(a.frecency.count, 1);
        assert_eq!(a.frecency.recent_search_terms, vec!["aa"]);
    }

    #[test]
    fn incremental_remove_then_upsert() {
        let mut store = IndexStore::new();
        let mut a = item("a", "A");
        a.description = Some("old description".to_string());
        store
            .apply_index(
                "p",
                IndexMode::Full,
                vec![a, item("b", "B"), item("c", "C")],
                &[],
            )
            .unwrap();
        store.record_item_usage("p", "a", &ExecutionContext::new(None, NOW), 10);

        let mut a2 = item("a", "A prime");
        a2.icon = Some("new-icon".to_string());
        store
            .apply_index("p", IndexMode::Incremental, vec![a2], &["b".to_string()])
            .unwrap();

        assert_eq!(ids(&store, "p"), vec!["a", "c"]);
        let merged = store.get("p", "a").unwrap();
        assert_eq!(merged.item.name, "A prime");
        assert_eq!(merged.item.icon.as_deref(), Some("new-icon"));
        assert_eq!(merged.item.description.as_deref(), Some("old description"));
        assert_eq!(merged.frecency.count, 1);
    }

    #[test]
    fn invalid_payload_does_not_mutate() {
        let mut store = IndexStore::new();
        store
            .apply_index("p", IndexMode::Full, vec![item("a", "A")], &[])
            .unwrap();
        let generation = store.generation();

        let err = store
            .apply_index("p", IndexMode::Full, vec![item("b", "B"), item("", "nameless")], &[])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIndex(_)));
        assert!(
            store
                .apply_index("p", IndexMode::Incremental, vec![item("c", " ")], &[])
                .is_err()
        );
        assert_eq!(ids(&store, "p"), vec!["a"]);
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn full_reindex_keeps_static_items() {
        let p = plugin(FrecencyMode::Item);
        let mut store = IndexStore::new();
        store.ingest_static(&p.id, &p.manifest.static_index);
        store
            .apply_index(&p.id, IndexMode::Full, vec![item("x", "X")], &[])
            .unwrap();

        assert_eq!(ids(&store, &p.id), vec!["static", "x"]);
        assert_eq!(store.item_ids(&p.id), vec!["x"]);
    }

    #[test]
    fn same_full_payload_twice_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        let payload = || vec![item("a", "A"), item("b", "B"), item("c", "C")];

        let mut store = IndexStore::new();
        store.apply_index("p", IndexMode::Full, payload(), &[]).unwrap();
        store.record_item_usage("p", "b", &ExecutionContext::new(Some("bb"), NOW), 10);
        let before: Vec<IndexedItem> = store.items("p").cloned().collect();
        store.save(&first).unwrap();

        store.apply_index("p", IndexMode::Full, payload(), &[]).unwrap();
        let after: Vec<IndexedItem> = store.items("p").cloned().collect();
        assert_eq!(after, before);
        assert_eq!(store.get("p", "b").unwrap().frecency.count, 1);

        store.save(&second).unwrap();
        let read = |path: &Path| -> Value {
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        };
        assert_eq!(
            read(&second)["indexes"]["p"]["items"],
            read(&first)["indexes"]["p"]["items"]
        );
    }

    #[test]
    fn indexed_item_replaces_static_with_same_id() {
        let p = plugin(FrecencyMode::Item);
        let mut store = IndexStore::new();
        store.ingest_static(&p.id, &p.manifest.static_index);
        store.record_item_usage(&p.id, "static", &ExecutionContext::new(None, NOW), 10);

        store
            .apply_index(
                &p.id,
                IndexMode::Full,
                vec![item("static", "From handler"), item("x", "X")],
                &[],
            )
            .unwrap();
        assert_eq!(ids(&store, &p.id), vec!["static", "x"]);
        let replaced = store.get(&p.id, "static").unwrap();
        assert_eq!(replaced.item.name, "From handler");
        assert!(!replaced.is_static);
        assert_eq!(replaced.frecency.count, 1);

        // Re-reading the manifest does not bring the static copy back
        store.ingest_static(&p.id, &p.manifest.static_index);
        assert_eq!(ids(&store, &p.id), vec!["static", "x"]);
        assert_eq!(store.get(&p.id, "static").unwrap().item.name, "From handler");
    }

    #[test]
    fn reingesting_same_static_items_is_not_a_change() {
        let p = plugin(FrecencyMode::Item);
        let mut store = IndexStore::new();
        store.ingest_static(&p.id, &p.manifest.static_index);
        let generation = store.generation();
        store.ingest_static(&p.id, &p.manifest.static_index);
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn plugin_mode_counts_virtual_entry() {
        let p = plugin(FrecencyMode::Plugin);
        let mut store = IndexStore::new();
        store.ingest_static(&p.id, &p.manifest.static_index);

        let ctx = ExecutionContext::new(Some("ap"), NOW);
        assert!(store.record_execution(&p, Some("static"), &ctx, 10));

        assert_eq!(store.plugin_entry(&p.id).unwrap().frecency.count, 1);
        assert_eq!(store.get(&p.id, "static").unwrap().frecency.count, 0);
        assert!(store.items(&p.id).all(|i| !i.is_plugin_entry()));
    }

    #[test]
    fn none_mode_records_nothing() {
        let p = plugin(FrecencyMode::None);
        let mut store = IndexStore::new();
        store.ingest_static(&p.id, &p.manifest.static_index);
        let generation = store.generation();
        assert!(!store.record_execution(&p, Some("static"), &ExecutionContext::new(None, NOW), 10));
        assert_eq!(store.generation(), generation);
    }

    #[test]
    fn incremental_remove_never_drops_plugin_entry() {
        let p = plugin(FrecencyMode::Plugin);
        let mut store = IndexStore::new();
        store.record_plugin_usage(&p, &ExecutionContext::new(None, NOW), 10);
        store
            .apply_index(
                &p.id,
                IndexMode::Incremental,
                vec![],
                &[PLUGIN_ENTRY_ID.to_string()],
            )
            .unwrap();
        assert!(store.plugin_entry(&p.id).is_some());
    }

    #[test]
    fn save_load_round_trip_preserves_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-indexes.json");

        let mut store = IndexStore::new();
        store
            .apply_index("p", IndexMode::Full, vec![item("a", "A")], &[])
            .unwrap();
        store.record_item_usage("p", "a", &ExecutionContext::new(Some("q"), NOW), 10);
        store.save(&path).unwrap();
        assert!(!store.is_dirty());

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], CACHE_VERSION);
        assert!(raw["savedAt"].as_u64().unwrap() > 0);
        assert_eq!(raw["indexes"]["p"]["items"][0]["_count"], 1);

        let loaded = IndexStore::load(&path);
        let a = loaded.get("p", "a").unwrap();
        assert_eq!(a.frecency.count, 1);
        assert_eq!(a.frecency.last_used, NOW);
        assert_eq!(a.frecency.recent_search_terms, vec!["q"]);
        assert_eq!(loaded.stats().items_with_frecency, 1);
    }

    #[test]
    fn corrupt_cache_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-indexes.json");
        std::fs::write(&path, "{\"version\": 1, \"indexes\": [").unwrap();
        assert_eq!(IndexStore::load(&path).stats(), IndexStats::default());
    }

    #[test]
    fn save_is_skipped_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-indexes.json");
        let mut store = IndexStore::new();
        store.save(&path).unwrap();
        assert!(!path.exists());
    }
}

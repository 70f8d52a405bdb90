//! The global list shown while no plugin is open: ranked search over plugins,
//! indexed items and history, plus the instant-trigger and web-search rows.

use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LumenCore, RequestTag};
use crate::frecency::{ExecutionContext, HistoryEntry, HistoryKind, HistoryLog, HistoryRecord};
use crate::index::IndexStore;
use crate::plugin::{FrecencyMode, HandlerType, Plugin, PluginInput, PluginManager, PluginResponse};
use crate::search::{RankingParams, Searchable, SearchableSource, rank};
use crate::session::QueuedRequest;
use crate::transport::OneShotOutput;
use crate::utils::{encode_query, now_millis};
use crate::Result;
use lumen_types::{CoreUpdate, ExecuteAction, ResultItem, ResultType};

const MATCH_ROW_ID: &str = "__match__";
const WEB_SEARCH_ROW_ID: &str = "__web_search__";
/// Owner of history rows that belong to no plugin
const HISTORY_OWNER: &str = "history";

/// Flattened searchables, rebuilt when the index or history changes
#[derive(Debug, Default)]
pub(super) struct SearchSpace {
    items: Vec<Searchable>,
    built_for: Option<(u64, u64)>,
}

/// What selecting a global row does
#[derive(Debug, Clone, PartialEq)]
pub(super) enum GlobalTarget {
    Plugin {
        plugin_id: String,
    },
    Indexed {
        plugin_id: String,
        item_id: String,
    },
    History {
        kind: HistoryKind,
        plugin_id: Option<String>,
        id: String,
    },
    WebSearch {
        query: String,
    },
    PatternMatch {
        plugin_id: String,
        query: String,
        item: Option<ResultItem>,
    },
}

/// Rows currently shown in the global list
#[derive(Debug, Default)]
pub(super) struct GlobalView {
    query: String,
    rows: Vec<(ResultItem, GlobalTarget)>,
    match_seq: u64,
    match_task: Option<AbortHandle>,
}

impl GlobalView {
    pub(super) fn clear(&mut self) {
        self.cancel_match();
        self.query.clear();
        self.rows.clear();
    }

    fn cancel_match(&mut self) {
        if let Some(task) = self.match_task.take() {
            task.abort();
        }
    }

    fn find(&self, item_id: &str, plugin_id: Option<&str>) -> Option<&GlobalTarget> {
        self.rows
            .iter()
            .find(|(item, _)| {
                item.id == item_id
                    && plugin_id.is_none_or(|p| item.plugin_id.as_deref() == Some(p))
            })
            .map(|(_, target)| target)
    }
}

fn build_space(plugins: &PluginManager, index: &IndexStore, history: &HistoryLog) -> Vec<Searchable> {
    let mut items = Vec::new();

    for plugin in plugins.all().filter(|p| p.is_listed()) {
        let mut entry = Searchable::new(
            SearchableSource::Plugin,
            &plugin.id,
            &plugin.id,
            &plugin.manifest.name,
        )
        .with_keywords(vec![plugin.id.clone()]);
        let mut terms: &[String] = &[];
        if let Some(usage) = index.plugin_entry(&plugin.id) {
            entry = entry.with_usage(f64::from(usage.frecency.count), usage.frecency.last_used);
            terms = &usage.frecency.recent_search_terms;
        }
        items.extend(terms.iter().map(|t| entry.history_term(t)));
        items.push(entry);
    }

    for plugin_id in index.plugin_ids() {
        if plugins.get(plugin_id).is_none() {
            continue;
        }
        for indexed in index.items(plugin_id) {
            let entry = Searchable::new(
                SearchableSource::IndexedItem,
                plugin_id,
                indexed.id(),
                &indexed.item.name,
            )
            .with_keywords(indexed.item.keywords.clone())
            .with_usage(
                f64::from(indexed.frecency.count),
                indexed.frecency.last_used,
            );
            items.extend(
                indexed
                    .frecency
                    .recent_search_terms
                    .iter()
                    .map(|t| entry.history_term(t)),
            );
            items.push(entry);
        }
    }

    // Entries already represented by an index item are found through it
    for entry in history.entries() {
        let backed = entry
            .plugin_id
            .as_deref()
            .is_some_and(|p| index.contains(p, &entry.id));
        if backed {
            continue;
        }
        let owner = entry.plugin_id.as_deref().unwrap_or(HISTORY_OWNER);
        let searchable = Searchable::new(SearchableSource::History, owner, &entry.id, &entry.name)
            .with_usage(entry.count, entry.last_used);
        items.extend(
            entry
                .recent_search_terms
                .iter()
                .map(|t| searchable.history_term(t)),
        );
        items.push(searchable);
    }

    items
}

fn plugin_row(plugin: &Plugin) -> (ResultItem, GlobalTarget) {
    let item = ResultItem {
        id: plugin.id.clone(),
        name: plugin.manifest.name.clone(),
        description: plugin.manifest.description.clone(),
        icon: Some(plugin.icon()),
        result_type: ResultType::Plugin,
        ..Default::default()
    }
    .with_plugin_id(&plugin.id);
    let target = GlobalTarget::Plugin {
        plugin_id: plugin.id.clone(),
    };
    (item, target)
}

fn history_row(entry: &HistoryEntry) -> (ResultItem, GlobalTarget) {
    let result_type = if entry.kind == HistoryKind::WebSearch {
        ResultType::WebSearch
    } else {
        ResultType::History
    };
    let item = ResultItem {
        id: entry.id.clone(),
        name: entry.name.clone(),
        description: entry.description.clone(),
        icon: entry.icon.clone(),
        result_type,
        plugin_id: Some(
            entry
                .plugin_id
                .clone()
                .unwrap_or_else(|| HISTORY_OWNER.to_string()),
        ),
        ..Default::default()
    };
    let target = GlobalTarget::History {
        kind: entry.kind,
        plugin_id: entry.plugin_id.clone(),
        id: entry.id.clone(),
    };
    (item, target)
}

fn web_search_row(query: &str) -> (ResultItem, GlobalTarget) {
    let item = ResultItem {
        id: WEB_SEARCH_ROW_ID.to_string(),
        name: format!("Search the web for \"{query}\""),
        icon: Some("search".to_string()),
        result_type: ResultType::WebSearch,
        ..Default::default()
    };
    let target = GlobalTarget::WebSearch {
        query: query.to_string(),
    };
    (item, target)
}

impl LumenCore {
    pub(super) fn on_query_changed(&mut self, query: String) {
        if self.session.is_some() {
            self.on_query_changed_in_session(query);
            return;
        }
        if let Some((plugin, rest)) = self.plugins.find_by_prefix(&query) {
            let plugin_id = plugin.id.clone();
            let rest = rest.to_string();
            debug!("[{}] Activated by prefix", plugin_id);
            self.open_plugin(&plugin_id, Some(rest));
            return;
        }
        self.show_global(query);
    }

    /// Rebuild and emit the global list for `query`. An empty query lists
    /// recent history.
    pub(super) fn show_global(&mut self, query: String) {
        self.global.cancel_match();
        let trimmed = query.trim();

        let mut rows = if trimmed.is_empty() {
            self.history
                .recent(self.config.search.max_recent_items)
                .into_iter()
                .map(history_row)
                .collect()
        } else {
            self.ranked_rows(trimmed)
        };

        if !trimmed.is_empty() {
            if let Some(row) = self.start_pattern_match(trimmed) {
                rows.insert(0, row);
            }
            rows.push(web_search_row(trimmed));
        }

        self.global.query = query;
        self.global.rows = rows;
        self.emit_global();
    }

    fn refresh_space(&mut self) {
        let key = (self.index.generation(), self.revision);
        if self.space.built_for == Some(key) {
            return;
        }
        self.space.items = build_space(&self.plugins, &self.index, &self.history);
        self.space.built_for = Some(key);
        debug!("Rebuilt search space ({} entries)", self.space.items.len());
    }

    fn ranked_rows(&mut self, query: &str) -> Vec<(ResultItem, GlobalTarget)> {
        self.refresh_space();
        let params = RankingParams::from(&self.config.search);
        let hits = rank(
            &mut self.search,
            query,
            &self.space.items,
            &params,
            now_millis(),
        );
        hits.iter()
            .filter_map(|hit| self.row_for(hit.searchable))
            .collect()
    }

    fn row_for(&self, searchable: &Searchable) -> Option<(ResultItem, GlobalTarget)> {
        match searchable.source {
            SearchableSource::Plugin => self.plugins.get(&searchable.plugin_id).map(plugin_row),
            SearchableSource::IndexedItem => {
                let indexed = self.index.get(&searchable.plugin_id, &searchable.id)?;
                let mut item = indexed.item.clone().with_plugin_id(&searchable.plugin_id);
                if item.result_type == ResultType::Normal {
                    item.result_type = ResultType::IndexedItem;
                }
                let target = GlobalTarget::Indexed {
                    plugin_id: searchable.plugin_id.clone(),
                    item_id: searchable.id.clone(),
                };
                Some((item, target))
            }
            SearchableSource::History => self
                .history
                .entries()
                .iter()
                .find(|e| {
                    e.id == searchable.id
                        && e.plugin_id.as_deref().unwrap_or(HISTORY_OWNER) == searchable.plugin_id
                })
                .map(history_row),
        }
    }

    /// Ask the best pattern-matching plugin about the query. Returns the
    /// placeholder row its answer will replace.
    fn start_pattern_match(&mut self, query: &str) -> Option<(ResultItem, GlobalTarget)> {
        let plugin = self.plugins.find_matching(query)?;
        if plugin.manifest.handler_type() != HandlerType::Stdio {
            return None;
        }

        self.global.match_seq += 1;
        let seq = self.global.match_seq;
        let token = Uuid::new_v4().to_string();
        let input = PluginInput::pattern_match(query).with_session(&token);
        self.global.match_task = self.spawn_oneshot(plugin, input, RequestTag::Match { seq });

        let item = ResultItem {
            id: MATCH_ROW_ID.to_string(),
            name: format!("Run with {}", plugin.manifest.name),
            icon: Some(plugin.icon()),
            result_type: ResultType::PatternMatch,
            ..Default::default()
        }
        .with_plugin_id(&plugin.id);
        let target = GlobalTarget::PatternMatch {
            plugin_id: plugin.id.clone(),
            query: query.to_string(),
            item: None,
        };
        Some((item, target))
    }

    pub(super) fn on_match_output(&mut self, plugin_id: &str, seq: u64, result: Result<OneShotOutput>) {
        if seq != self.global.match_seq || self.session.is_some() {
            debug!("[{}] Dropping stale match answer", plugin_id);
            return;
        }
        self.global.match_task = None;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!("[{}] Match request failed: {}", plugin_id, e);
                return;
            }
        };
        self.apply_side_outputs(plugin_id, output.side);

        let position = self
            .global
            .rows
            .iter()
            .position(|(_, t)| matches!(t, GlobalTarget::PatternMatch { item: None, .. }));
        let Some(position) = position else {
            return;
        };

        match output.primary {
            PluginResponse::Match { result: Some(item) } => {
                let mut row = item.clone().with_plugin_id(plugin_id);
                row.result_type = ResultType::PatternMatch;
                let (_, target) = &mut self.global.rows[position];
                if let GlobalTarget::PatternMatch { item: slot, .. } = target {
                    *slot = Some(item);
                }
                self.global.rows[position].0 = row;
            }
            PluginResponse::Match { result: None } => {
                self.global.rows.remove(position);
            }
            other => {
                debug!("[{}] Unexpected '{}' for match", plugin_id, other.type_name());
                return;
            }
        }
        self.emit_global();
    }

    fn emit_global(&self) {
        let results = self.global.rows.iter().map(|(item, _)| item.clone()).collect();
        self.emit(CoreUpdate::Results {
            results,
            placeholder: None,
            clear_input: false,
            input_mode: None,
            context: None,
        });
    }

    pub(super) fn on_item_selected(
        &mut self,
        item_id: &str,
        action: Option<String>,
        plugin_id: Option<&str>,
    ) {
        if self.session.is_some() {
            self.select_in_session(item_id, action);
            return;
        }
        let Some(target) = self.global.find(item_id, plugin_id).cloned() else {
            debug!("Selected row {} is not in the global list", item_id);
            return;
        };

        let query = self.global.query.trim().to_string();
        let term = Some(query.as_str()).filter(|q| !q.is_empty());
        let context = ExecutionContext::new(term, now_millis());

        match target {
            GlobalTarget::Plugin { plugin_id } => self.launch_plugin_entry(&plugin_id, &context),
            GlobalTarget::Indexed { plugin_id, item_id } => {
                self.launch_indexed(&plugin_id, &item_id, action, &context);
            }
            GlobalTarget::History {
                kind,
                plugin_id,
                id,
            } => self.launch_history(kind, plugin_id.as_deref(), &id, action, &context),
            GlobalTarget::WebSearch { query } => self.launch_web_search(&query, &context),
            GlobalTarget::PatternMatch {
                plugin_id,
                query,
                item,
            } => match item.filter(|i| i.entry_point.is_some()) {
                Some(item) => self.replay(
                    &plugin_id,
                    &item.id,
                    item.entry_point.as_ref(),
                    action,
                    item.keep_open,
                ),
                None => self.open_plugin(&plugin_id, Some(query)),
            },
        }

        self.revision += 1;
        self.schedule_flush();
    }

    fn launch_plugin_entry(&mut self, plugin_id: &str, context: &ExecutionContext) {
        if let Some(plugin) = self.plugins.get(plugin_id) {
            let max_terms = self.config.history.max_search_terms;
            self.index.record_plugin_usage(plugin, context, max_terms);
        }
        self.open_plugin(plugin_id, None);
    }

    fn launch_indexed(
        &mut self,
        plugin_id: &str,
        item_id: &str,
        action: Option<String>,
        context: &ExecutionContext,
    ) {
        let Some(plugin) = self.plugins.get(plugin_id) else {
            return;
        };
        let Some(item) = self.index.get(plugin_id, item_id).map(|i| i.item.clone()) else {
            warn!("[{}] Item {} left the index", plugin_id, item_id);
            return;
        };

        let chosen = action
            .as_deref()
            .and_then(|a| item.actions.iter().find(|x| x.id == a));
        let (entry_point, keep_open) = match (&action, chosen) {
            (None, _) => (item.entry_point.clone(), item.keep_open),
            (Some(_), Some(a)) => (a.entry_point.clone(), a.keep_open),
            (Some(_), None) => (None, false),
        };

        let max_terms = self.config.history.max_search_terms;
        self.index
            .record_execution(plugin, Some(item_id), context, max_terms);
        if plugin.manifest.frecency != FrecencyMode::None {
            let mut record = HistoryRecord::new(HistoryKind::Action, item_id, &item.name);
            record.plugin_id = Some(plugin_id.to_string());
            record.icon.clone_from(&item.icon);
            record.description.clone_from(&item.description);
            record.entry_point.clone_from(&entry_point);
            record.keep_open = keep_open;
            self.history.record(record, context);
        }

        self.replay(plugin_id, item_id, entry_point.as_ref(), action, keep_open);
    }

    fn launch_history(
        &mut self,
        kind: HistoryKind,
        plugin_id: Option<&str>,
        id: &str,
        action: Option<String>,
        context: &ExecutionContext,
    ) {
        let Some(entry) = self.history.find(kind, plugin_id, id).cloned() else {
            return;
        };
        if kind == HistoryKind::WebSearch {
            let query = entry.query.as_deref().unwrap_or(&entry.name);
            self.launch_web_search(query, context);
            return;
        }

        let Some(plugin_id) = entry.plugin_id.clone() else {
            self.emit(CoreUpdate::Error {
                message: format!("{} cannot be run again", entry.name),
            });
            return;
        };
        let Some(plugin) = self.plugins.get(&plugin_id) else {
            self.emit(CoreUpdate::Error {
                message: format!("{} is no longer available", entry.name),
            });
            return;
        };

        let max_terms = self.config.history.max_search_terms;
        self.index
            .record_execution(plugin, Some(id), context, max_terms);
        let record = HistoryRecord {
            plugin_id: Some(plugin_id.clone()),
            icon: entry.icon.clone(),
            description: entry.description.clone(),
            entry_point: entry.entry_point.clone(),
            keep_open: entry.keep_open,
            query: entry.query.clone(),
            ..HistoryRecord::new(kind, id, &entry.name)
        };
        self.history.record(record, context);

        self.replay(
            &plugin_id,
            id,
            entry.entry_point.as_ref(),
            action,
            entry.keep_open,
        );
    }

    fn launch_web_search(&mut self, query: &str, context: &ExecutionContext) {
        let mut record = HistoryRecord::new(HistoryKind::WebSearch, query, query);
        record.query = Some(query.to_string());
        record.icon = Some("search".to_string());
        self.history.record(record, context);

        let url = format!(
            "{}{}",
            self.config.search.engine_base_url,
            encode_query(query)
        );
        info!("Web search for '{}'", query);
        self.emit(CoreUpdate::Execute {
            action: ExecuteAction::OpenUrl { url },
        });
        self.close_launcher();
    }

    /// Send a stored request to its plugin without the user opening it.
    ///
    /// Items that keep the launcher open, and every daemon plugin, run inside
    /// a session entered at depth 1. Others run as a detached one-shot that
    /// outlives the launcher closing.
    fn replay(
        &mut self,
        plugin_id: &str,
        item_id: &str,
        entry_point: Option<&Value>,
        action: Option<String>,
        keep_open: bool,
    ) {
        let Some(plugin) = self.plugins.get(plugin_id).cloned() else {
            warn!("[{}] Cannot replay for unknown plugin", plugin_id);
            return;
        };
        let input = match entry_point.map(PluginInput::from_entry_point) {
            Some(Ok(input)) => input,
            Some(Err(e)) => {
                warn!("[{}] Ignoring bad entry point of {}: {}", plugin_id, item_id, e);
                PluginInput::action(item_id, action)
            }
            None => PluginInput::action(item_id, action),
        };
        debug!("[{}] Replaying {} step for {}", plugin_id, input.step.as_str(), item_id);

        if keep_open || plugin.is_daemon() {
            if !self.activate(&plugin) {
                return;
            }
            if let Some(session) = self.session.as_mut() {
                session.navigator.enter_replay();
            }
            self.emit(CoreUpdate::NavigationDepthChanged { depth: 1 });
            self.send_request(QueuedRequest::new(input, None));
            return;
        }

        let token = Uuid::new_v4().to_string();
        self.spawn_oneshot(&plugin, input.with_session(&token), RequestTag::Replay);
        self.close_launcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistorySettings;
    use crate::plugin::Manifest;
    use serde_json::json;
    use std::path::PathBuf;

    fn plugin(id: &str, name: &str) -> Plugin {
        let manifest: Manifest = serde_json::from_value(json!({
            "name": name,
            "handler": {"type": "stdio", "command": "/bin/cat"}
        }))
        .unwrap();
        Plugin::from_manifest(id.to_string(), PathBuf::from("/tmp"), manifest, false).unwrap()
    }

    #[test]
    fn history_backed_by_index_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = crate::config::Directories::with_base(dir.path().to_path_buf());
        let mut plugins = PluginManager::new(&dirs);
        plugins.insert(plugin("apps", "Apps"));

        let mut index = IndexStore::new();
        index
            .apply_index(
                "apps",
                crate::plugin::IndexMode::Full,
                vec![ResultItem {
                    id: "firefox".to_string(),
                    name: "Firefox".to_string(),
                    ..Default::default()
                }],
                &[],
            )
            .unwrap();

        let mut history = HistoryLog::new(HistorySettings::default());
        let ctx = ExecutionContext::new(Some("fire"), 1_000);
        let mut backed = HistoryRecord::new(HistoryKind::Action, "firefox", "Firefox");
        backed.plugin_id = Some("apps".to_string());
        history.record(backed, &ctx);
        history.record(HistoryRecord::new(HistoryKind::WebSearch, "rust", "rust"), &ctx);

        let space = build_space(&plugins, &index, &history);
        let history_rows: Vec<&str> = space
            .iter()
            .filter(|s| s.source == SearchableSource::History && !s.is_history_term)
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(history_rows, vec!["rust"]);
        assert!(space.iter().any(|s| s.source == SearchableSource::Plugin && s.id == "apps"));
        assert!(space.iter().any(|s| s.source == SearchableSource::IndexedItem && s.id == "firefox"));
        assert!(
            space
                .iter()
                .any(|s| s.is_history_term && s.name == "fire" && s.plugin_id == HISTORY_OWNER)
        );
    }

    #[test]
    fn view_lookup_respects_plugin_filter() {
        let mut view = GlobalView::default();
        view.rows.push(plugin_row(&plugin("calc", "Calculator")));
        view.rows.push(web_search_row("calc"));

        assert!(matches!(
            view.find("calc", Some("calc")),
            Some(GlobalTarget::Plugin { .. })
        ));
        assert!(view.find("calc", Some("other")).is_none());
        assert!(matches!(
            view.find(WEB_SEARCH_ROW_ID, None),
            Some(GlobalTarget::WebSearch { query }) if query == "calc"
        ));

        view.clear();
        assert!(view.rows.is_empty());
    }
}

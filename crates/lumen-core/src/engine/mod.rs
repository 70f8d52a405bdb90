mod dispatch;
mod global;
mod responses;

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::{Config, Directories};
use crate::frecency::HistoryLog;
use crate::index::{IndexStats, IndexStore, WriteCoalescer};
use crate::plugin::{IndexMode, PluginDiff, PluginManager};
use crate::search::SearchEngine;
use crate::session::Session;
use crate::supervisor::{DaemonState, DaemonSupervisor};
use crate::transport::{DaemonEvent, OneShotOutput};
use crate::{Error, Result};
use global::{GlobalView, SearchSpace};
use lumen_types::{CoreEvent, CoreUpdate, PluginStatus};

/// What a finished one-shot run was for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTag {
    /// A request of the active session; applied only while that exact
    /// request is still the one in flight
    Session { token: String, seq: u64 },
    /// Entry-point replay from the global list. Never cancelled.
    Replay,
    Index,
    /// Instant-trigger `match` for the global query with this sequence
    Match { seq: u64 },
}

/// Completed background work, fed back through [`LumenCore::handle_message`]
#[derive(Debug)]
pub enum CoreMessage {
    OneShotFinished {
        plugin_id: String,
        tag: RequestTag,
        result: Result<OneShotOutput>,
    },
    Daemon {
        plugin_id: String,
        generation: u64,
        event: DaemonEvent,
    },
    RestartDue {
        plugin_id: String,
        generation: u64,
    },
    SliderSettled {
        token: String,
        seq: u64,
    },
    PollDue {
        token: String,
        seq: u64,
    },
    FlushDue,
}

/// Receiving ends handed to the host
pub struct CoreChannels {
    /// Updates for the front end
    pub updates: UnboundedReceiver<CoreUpdate>,
    /// Must be drained into [`LumenCore::handle_message`]
    pub internal: UnboundedReceiver<CoreMessage>,
}

/// Point-in-time summary for status queries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSnapshot {
    pub is_open: bool,
    pub plugin_count: usize,
    pub active_plugin: Option<String>,
    pub navigation_depth: u32,
    pub running_daemons: Vec<String>,
    pub unavailable_plugins: Vec<String>,
    pub index: IndexStats,
    pub history_entries: usize,
}

/// Core launcher engine
pub struct LumenCore {
    dirs: Directories,
    config: Config,
    plugins: PluginManager,
    index: IndexStore,
    history: HistoryLog,
    supervisor: DaemonSupervisor,
    search: SearchEngine,
    space: SearchSpace,
    global: GlobalView,
    session: Option<Session>,
    statuses: HashMap<String, PluginStatus>,
    flush: WriteCoalescer,
    is_open: bool,
    /// Bumped whenever history or the plugin set changes
    revision: u64,
    update_tx: UnboundedSender<CoreUpdate>,
    msg_tx: UnboundedSender<CoreMessage>,
}

impl LumenCore {
    /// Create a core from resolved directories and config.
    ///
    /// Plugins are discovered, the index cache and history log are read, and
    /// static index items are ingested. Nothing is spawned until [`start`].
    ///
    /// [`start`]: LumenCore::start
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or plugin
    /// discovery fails.
    pub fn new(dirs: Directories, config: Config) -> Result<(Self, CoreChannels)> {
        dirs.ensure_exists()?;

        let mut plugins = PluginManager::new(&dirs);
        plugins.discover()?;

        let mut index = IndexStore::load(&dirs.index_cache);
        for plugin in plugins.all() {
            if !plugin.manifest.static_index.is_empty() {
                index.ingest_static(&plugin.id, &plugin.manifest.static_index);
            }
        }
        let history = HistoryLog::load(&dirs.history_file, config.history.clone());

        let (update_tx, updates) = mpsc::unbounded_channel();
        let (msg_tx, internal) = mpsc::unbounded_channel();

        info!(
            "Core ready: {} plugins, {} indexed items, {} history entries",
            plugins.len(),
            index.stats().item_count,
            history.len()
        );

        let core = Self {
            supervisor: DaemonSupervisor::new(config.daemon.clone(), msg_tx.clone()),
            flush: WriteCoalescer::new(config.persistence.flush_interval()),
            search: SearchEngine::new(),
            space: SearchSpace::default(),
            global: GlobalView::default(),
            session: None,
            statuses: HashMap::new(),
            is_open: false,
            revision: 0,
            dirs,
            config,
            plugins,
            index,
            history,
            update_tx,
            msg_tx,
        };
        Ok((core, CoreChannels { updates, internal }))
    }

    /// Create a core reading `config.json` from the given directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or [`LumenCore::new`] fails.
    pub fn from_dirs(dirs: Directories) -> Result<(Self, CoreChannels)> {
        let config = Config::load(&dirs.config_file)?;
        Self::new(dirs, config)
    }

    /// Start background daemons and request a reindex from every
    /// index-enabled plugin. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        let background: Vec<String> = self
            .plugins
            .background_daemons()
            .map(|p| p.id.clone())
            .collect();
        for id in &background {
            self.start_background_daemon(id);
        }

        let indexed: Vec<String> = self
            .plugins
            .all()
            .filter(|p| p.command.is_some() && p.manifest.is_indexed())
            .map(|p| p.id.clone())
            .collect();
        for id in &indexed {
            if let Err(e) = self.reindex(id, None) {
                warn!("[{}] Startup reindex failed: {}", id, e);
            }
        }
    }

    fn start_background_daemon(&mut self, plugin_id: &str) {
        let Some(plugin) = self.plugins.get(plugin_id) else {
            return;
        };
        let token = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.supervisor.start(plugin, &token) {
            warn!("[{}] Failed to start background daemon: {}", plugin_id, e);
        }
    }

    /// Handle one front-end event
    pub fn process(&mut self, event: CoreEvent) {
        debug!("Event: {:?}", event);
        match event {
            CoreEvent::QueryChanged { query } => self.on_query_changed(query),
            CoreEvent::QuerySubmitted { query, context } => self.on_query_submitted(query, context),
            CoreEvent::ItemSelected {
                id,
                action,
                plugin_id,
            } => self.on_item_selected(&id, action, plugin_id.as_deref()),
            CoreEvent::SliderChanged { id, value } => self.on_slider_changed(&id, value),
            CoreEvent::SwitchToggled { id, value } => self.on_switch_toggled(&id, value),
            CoreEvent::FormSubmitted { form_data, context } => {
                self.on_form_submitted(form_data, context);
            }
            CoreEvent::FormFieldChanged {
                field_id,
                value,
                form_data,
            } => self.on_form_field_changed(field_id, value, form_data),
            CoreEvent::Back => self.on_back(),
            CoreEvent::Escape => self.on_escape(),
            CoreEvent::OpenPlugin { plugin_id } => self.open_plugin(&plugin_id, None),
            CoreEvent::ClosePlugin => self.close_plugin(),
            CoreEvent::LauncherOpened => self.on_launcher_opened(),
            CoreEvent::LauncherClosed => self.on_launcher_closed(),
            CoreEvent::RefreshIndex { plugin_id } => {
                if let Err(e) = self.reindex(&plugin_id, None) {
                    warn!("[{}] Reindex failed: {}", plugin_id, e);
                }
            }
            CoreEvent::PluginActionTriggered { action_id } => {
                self.on_plugin_action(action_id);
            }
        }
    }

    /// Apply completed background work
    pub fn handle_message(&mut self, message: CoreMessage) {
        match message {
            CoreMessage::OneShotFinished {
                plugin_id,
                tag,
                result,
            } => self.on_oneshot_finished(&plugin_id, tag, result),
            CoreMessage::Daemon {
                plugin_id,
                generation,
                event,
            } => self.on_daemon_event(&plugin_id, generation, event),
            CoreMessage::RestartDue {
                plugin_id,
                generation,
            } => self.on_restart_due(&plugin_id, generation),
            CoreMessage::SliderSettled { token, seq } => self.on_slider_settled(&token, seq),
            CoreMessage::PollDue { token, seq } => self.on_poll_due(&token, seq),
            CoreMessage::FlushDue => self.flush_now(),
        }
    }

    fn on_launcher_opened(&mut self) {
        self.is_open = true;
        self.emit(CoreUpdate::Show);
        if self.session.is_none() {
            self.show_global(String::new());
        }
    }

    fn on_launcher_closed(&mut self) {
        if self.session.is_some() {
            self.close_plugin();
        }
        self.is_open = false;
        self.global.clear();
    }

    /// Store a plugin's status, merging ambient items, and push it to the
    /// front end.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` for an unknown plugin id.
    pub fn update_status(&mut self, plugin_id: &str, status: PluginStatus) -> Result<()> {
        if self.plugins.get(plugin_id).is_none() {
            return Err(Error::PluginNotFound(plugin_id.to_string()));
        }
        self.apply_status(plugin_id, status);
        Ok(())
    }

    pub(crate) fn apply_status(&mut self, plugin_id: &str, status: PluginStatus) {
        let merged = merge_status(self.statuses.get(plugin_id), status);
        self.statuses.insert(plugin_id.to_string(), merged.clone());
        self.emit(CoreUpdate::PluginStatusUpdate {
            plugin_id: plugin_id.to_string(),
            status: merged,
        });
    }

    #[must_use]
    pub fn status(&self, plugin_id: &str) -> Option<&PluginStatus> {
        self.statuses.get(plugin_id)
    }

    /// Rescan the plugin directories.
    ///
    /// Daemons of removed or changed plugins are stopped, dead daemons get a
    /// fresh restart budget, and removed plugins lose their index.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin directories cannot be read.
    pub fn reload_plugins(&mut self) -> Result<PluginDiff> {
        let diff = self.plugins.rescan()?;

        let stale: Vec<String> = diff.stale().cloned().collect();
        if self
            .session
            .as_ref()
            .is_some_and(|s| stale.contains(&s.plugin_id))
        {
            self.close_plugin();
        }
        for id in &stale {
            self.supervisor.forget(id);
        }
        for id in self.supervisor.unavailable() {
            info!("[{}] Clearing dead daemon on reload", id);
            self.supervisor.forget(&id);
        }
        for id in &diff.removed {
            self.index.remove_plugin(id);
            self.statuses.remove(id);
        }

        for id in diff.added.iter().chain(&diff.updated) {
            let Some(plugin) = self.plugins.get(id) else {
                continue;
            };
            if !plugin.manifest.static_index.is_empty() {
                self.index
                    .ingest_static(&plugin.id, &plugin.manifest.static_index);
            }
            if plugin.is_background_daemon() {
                let id = plugin.id.clone();
                self.start_background_daemon(&id);
            }
        }

        if !diff.is_empty() {
            info!(
                "Plugins reloaded: {} added, {} removed, {} updated",
                diff.added.len(),
                diff.removed.len(),
                diff.updated.len()
            );
            self.revision += 1;
            self.schedule_flush();
        }
        Ok(diff)
    }

    /// Re-read `config.json`. On error the current config stays in effect.
    ///
    /// # Errors
    ///
    /// Returns the load error.
    pub fn reload_config(&mut self) -> Result<()> {
        let config = Config::load(&self.dirs.config_file).inspect_err(|e| {
            warn!("Keeping current config: {}", e);
        })?;

        self.supervisor.set_settings(config.daemon.clone());
        self.flush.set_interval(config.persistence.flush_interval());
        self.history.set_settings(config.history.clone());
        self.config = config;
        self.revision += 1;
        info!("Config reloaded");
        Ok(())
    }

    /// Close the active plugin, stop every daemon, and write pending state
    pub fn shutdown(&mut self) {
        if self.session.is_some() {
            self.close_plugin();
        }
        self.supervisor.stop_all();
        self.flush_now();
        info!("Core shut down");
    }

    #[must_use]
    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            is_open: self.is_open,
            plugin_count: self.plugins.len(),
            active_plugin: self.session.as_ref().map(|s| s.plugin_id.clone()),
            navigation_depth: self.session.as_ref().map_or(0, |s| s.navigator.depth()),
            running_daemons: self.supervisor.running(),
            unavailable_plugins: self.supervisor.unavailable(),
            index: self.index.stats(),
            history_entries: self.history.len(),
        }
    }

    #[must_use]
    pub fn daemon_state(&self, plugin_id: &str) -> DaemonState {
        self.supervisor.state(plugin_id)
    }

    #[must_use]
    pub fn restart_count(&self, plugin_id: &str) -> u32 {
        self.supervisor.restart_count(plugin_id)
    }

    /// Token of the active session
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    #[must_use]
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    #[must_use]
    pub fn dirs(&self) -> &Directories {
        &self.dirs
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn emit(&self, update: CoreUpdate) {
        if self.update_tx.send(update).is_err() {
            debug!("Update receiver dropped");
        }
    }

    /// Note a mutation of the index or history and arm a flush if none is
    /// pending
    pub(crate) fn schedule_flush(&mut self) {
        let Some(at) = self.flush.mark_dirty(tokio::time::Instant::now()) else {
            return;
        };
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = tx.send(CoreMessage::FlushDue);
        });
    }

    /// Write the index cache and history log if they changed
    pub fn flush_now(&mut self) {
        self.flush.flushed();
        if self.index.is_dirty()
            && let Err(e) = self.index.save(&self.dirs.index_cache)
        {
            warn!("Failed to save index cache: {}", e);
        }
        if self.history.is_dirty()
            && let Err(e) = self.history.save(&self.dirs.history_file)
        {
            warn!("Failed to save history: {}", e);
        }
    }

    /// Ask a plugin for an index update. Without a mode the plugin gets an
    /// incremental request when the store already holds its items.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` for an unknown plugin,
    /// `Error::Plugin` if it has no handler, and `Error::DaemonUnavailable`
    /// if its socket daemon is not running.
    pub fn reindex(&mut self, plugin_id: &str, mode: Option<IndexMode>) -> Result<()> {
        self.request_index(plugin_id, mode)
    }
}

/// New status over the old one. Ambient items are only replaced when the new
/// status mentions them.
fn merge_status(old: Option<&PluginStatus>, new: PluginStatus) -> PluginStatus {
    match (old, new.ambient.is_none()) {
        (Some(old), true) => PluginStatus {
            ambient: old.ambient.clone(),
            ..new
        },
        _ => new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_types::{AmbientItem, Badge};

    fn ambient(id: &str) -> AmbientItem {
        AmbientItem {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            icon: None,
            duration: 0,
        }
    }

    #[test]
    fn status_without_ambient_keeps_old_ambient() {
        let old = PluginStatus {
            ambient: Some(vec![ambient("timer")]),
            ..Default::default()
        };
        let new = PluginStatus {
            badges: vec![Badge {
                text: Some("2".to_string()),
                icon: None,
                color: None,
            }],
            ..Default::default()
        };
        let merged = merge_status(Some(&old), new);
        assert_eq!(merged.badges.len(), 1);
        assert_eq!(merged.ambient, Some(vec![ambient("timer")]));
    }

    #[test]
    fn empty_ambient_clears() {
        let old = PluginStatus {
            ambient: Some(vec![ambient("timer")]),
            ..Default::default()
        };
        let new = PluginStatus {
            ambient: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(merge_status(Some(&old), new).ambient, Some(vec![]));
    }
}

mod manifest;
mod protocol;

pub use manifest::{
    DaemonConfig, FrecencyMode, Handler, HandlerType, IndexConfig, Manifest, MatchConfig,
};
pub use protocol::{
    CardResponse, ExecuteData, FormResponse, IndexMode, NavHints, PluginInput, PluginResponse,
    PromptData, RESPONSE_TYPES, ResultsResponse, SelectedItem, Step,
};

use crate::config::Directories;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MANIFEST_FILENAME: &str = "manifest.json";
const DEFAULT_HANDLER_FILENAME: &str = "handler";

/// A loaded plugin
#[derive(Debug, Clone)]
pub struct Plugin {
    pub id: String,
    pub path: PathBuf,
    pub manifest: Manifest,
    /// Program followed by its arguments. `None` for static-only plugins.
    pub command: Option<Vec<String>>,
    pub is_builtin: bool,
    compiled_patterns: Vec<regex::Regex>,
}

impl Plugin {
    /// Load a plugin from a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or invalid, or if the plugin
    /// has neither a handler nor a static index.
    pub fn load(path: PathBuf, is_builtin: bool) -> Result<Self> {
        let manifest_path = path.join(MANIFEST_FILENAME);
        if !manifest_path.exists() {
            return Err(Error::Plugin(format!(
                "{} not found in {}",
                MANIFEST_FILENAME,
                path.display()
            )));
        }

        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest: Manifest = serde_json::from_str(&content).map_err(|e| {
            Error::Plugin(format!(
                "Failed to parse manifest at {}: {}",
                manifest_path.display(),
                e
            ))
        })?;

        let id = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Plugin(format!("Invalid plugin directory: {}", path.display())))?
            .to_string();

        Self::from_manifest(id, path, manifest, is_builtin)
    }

    /// Build a plugin from an already-parsed manifest.
    ///
    /// # Errors
    ///
    /// Returns `Error::Plugin` if there is no handler and no static index.
    pub fn from_manifest(
        id: String,
        path: PathBuf,
        manifest: Manifest,
        is_builtin: bool,
    ) -> Result<Self> {
        let command = resolve_command(&path, manifest.handler.as_ref());
        if command.is_none() && manifest.static_index.is_empty() {
            return Err(Error::Plugin(format!(
                "{id}: no handler in {} (required unless staticIndex is provided)",
                path.display()
            )));
        }

        let mut compiled_patterns = Vec::new();
        if let Some(match_config) = &manifest.match_config {
            for pattern in &match_config.patterns {
                match regex::Regex::new(pattern) {
                    Ok(re) => compiled_patterns.push(re),
                    Err(err) => {
                        warn!("[{}] Invalid match pattern '{}': {}", id, pattern, err);
                    }
                }
            }
        }

        Ok(Self {
            id,
            path,
            manifest,
            command,
            is_builtin,
            compiled_patterns,
        })
    }

    /// The remainder of `query` after this plugin's activation prefix
    #[must_use]
    pub fn strip_prefix<'q>(&self, query: &'q str) -> Option<&'q str> {
        let prefix = self.manifest.prefix.as_deref()?;
        if prefix.is_empty() {
            return None;
        }
        query.strip_prefix(prefix)
    }

    #[must_use]
    pub fn matches_pattern(&self, query: &str) -> bool {
        self.compiled_patterns.iter().any(|re| re.is_match(query))
    }

    #[must_use]
    pub fn match_priority(&self) -> i32 {
        self.manifest
            .match_config
            .as_ref()
            .map_or(0, |c| c.priority)
    }

    #[must_use]
    pub fn is_daemon(&self) -> bool {
        self.command.is_some() && self.manifest.is_daemon()
    }

    #[must_use]
    pub fn is_background_daemon(&self) -> bool {
        self.command.is_some() && self.manifest.is_background_daemon()
    }

    /// Can be opened from the launcher (has a handler and is not index-only)
    #[must_use]
    pub fn is_openable(&self) -> bool {
        self.command.is_some() && !self.manifest.index_only
    }

    /// Shown as a plugin entry in the global result list
    #[must_use]
    pub fn is_listed(&self) -> bool {
        self.is_openable() && !self.manifest.hidden
    }

    #[must_use]
    pub fn icon(&self) -> String {
        self.manifest
            .icon
            .clone()
            .unwrap_or_else(|| "extension".to_string())
    }

    fn same_definition(&self, other: &Plugin) -> bool {
        self.manifest == other.manifest
            && self.command == other.command
            && self.path == other.path
    }
}

fn resolve_command(dir: &Path, handler: Option<&Handler>) -> Option<Vec<String>> {
    if let Some(handler) = handler {
        if let Some(command) = &handler.command {
            let mut parts: Vec<String> = command.split_whitespace().map(String::from).collect();
            let first = parts.first_mut()?;
            if first.starts_with("./") {
                *first = dir.join(first.as_str()).to_string_lossy().into_owned();
            }
            return Some(parts);
        }
        if let Some(path) = &handler.path {
            return Some(vec![dir.join(path).to_string_lossy().into_owned()]);
        }
    }

    let default = dir.join(DEFAULT_HANDLER_FILENAME);
    default
        .exists()
        .then(|| vec![default.to_string_lossy().into_owned()])
}

/// Result of plugin rescan diff
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PluginDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl PluginDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Plugins whose running processes are now stale
    pub fn stale(&self) -> impl Iterator<Item = &String> {
        self.removed.iter().chain(self.updated.iter())
    }
}

/// Compute diff between plugin sets
#[must_use]
pub fn diff_plugins(before: &HashMap<String, Plugin>, after: &HashMap<String, Plugin>) -> PluginDiff {
    let mut diff = PluginDiff::default();

    for id in before.keys() {
        if !after.contains_key(id) {
            diff.removed.push(id.clone());
        }
    }

    for (id, plugin) in after {
        match before.get(id) {
            None => diff.added.push(id.clone()),
            Some(old) if !old.same_definition(plugin) => diff.updated.push(id.clone()),
            _ => {}
        }
    }
    diff.added.sort();
    diff.removed.sort();
    diff.updated.sort();
    diff
}

/// Discovers plugins from the built-in and user directories
pub struct PluginManager {
    plugins: HashMap<String, Plugin>,
    plugin_order: Vec<String>,
    builtin_path: PathBuf,
    user_path: PathBuf,
    platform: String,
}

impl PluginManager {
    #[must_use]
    pub fn new(dirs: &Directories) -> Self {
        Self::with_platform(dirs, std::env::consts::OS)
    }

    #[must_use]
    pub fn with_platform(dirs: &Directories, platform: &str) -> Self {
        Self {
            plugins: HashMap::new(),
            plugin_order: Vec::new(),
            builtin_path: dirs.builtin_plugins.clone(),
            user_path: dirs.user_plugins.clone(),
            platform: platform.to_string(),
        }
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Discover and load all plugins. User plugins shadow built-ins with the
    /// same directory name.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin root exists but cannot be read.
    pub fn discover(&mut self) -> Result<()> {
        self.plugins.clear();
        self.plugin_order.clear();

        let builtin = self.builtin_path.clone();
        if builtin.exists() {
            self.load_plugins_from(&builtin, true)?;
        }

        let user = self.user_path.clone();
        if user.exists() {
            self.load_plugins_from(&user, false)?;
        }

        info!(
            "Loaded {} plugins: {:?}",
            self.plugins.len(),
            self.plugin_order
        );
        Ok(())
    }

    /// Rescan for plugin changes.
    ///
    /// # Errors
    ///
    /// Returns an error if plugin discovery fails.
    pub fn rescan(&mut self) -> Result<PluginDiff> {
        debug!("Rescanning plugins for changes");
        let before = std::mem::take(&mut self.plugins);
        self.discover()?;
        Ok(diff_plugins(&before, &self.plugins))
    }

    /// Register a plugin directly, bypassing discovery
    pub fn insert(&mut self, plugin: Plugin) {
        if !self.plugins.contains_key(&plugin.id) {
            self.plugin_order.push(plugin.id.clone());
        }
        self.plugins.insert(plugin.id.clone(), plugin);
    }

    fn load_plugins_from(&mut self, path: &Path, is_builtin: bool) -> Result<()> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(path)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for plugin_path in dirs {
            match Plugin::load(plugin_path.clone(), is_builtin) {
                Ok(plugin) => {
                    if !plugin.manifest.supports_platform(&self.platform) {
                        debug!(
                            "Skipping plugin {} - not supported on platform '{}'",
                            plugin.id, self.platform
                        );
                        continue;
                    }

                    if self.plugins.contains_key(&plugin.id) {
                        debug!("User plugin {} shadows built-in", plugin.id);
                    }
                    debug!(
                        "Loaded plugin: {} from {}",
                        plugin.id,
                        plugin_path.display()
                    );
                    self.insert(plugin);
                }
                Err(e) => {
                    warn!(
                        "Failed to load plugin from {}: {}",
                        plugin_path.display(),
                        e
                    );
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Plugin> {
        self.plugins.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Plugin> {
        self.plugin_order
            .iter()
            .filter_map(|id| self.plugins.get(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins that should start as background daemons
    pub fn background_daemons(&self) -> impl Iterator<Item = &Plugin> {
        self.all().filter(|p| p.is_background_daemon())
    }

    /// Highest-priority plugin whose match patterns accept the query.
    /// Ties go to the plugin discovered first.
    #[must_use]
    pub fn find_matching(&self, query: &str) -> Option<&Plugin> {
        let mut best: Option<&Plugin> = None;
        for plugin in self.all().filter(|p| p.command.is_some()) {
            if plugin.matches_pattern(query)
                && best.is_none_or(|b| plugin.match_priority() > b.match_priority())
            {
                best = Some(plugin);
            }
        }
        best
    }

    /// Plugin whose activation prefix starts the query, with the remainder.
    /// The longest prefix wins.
    #[must_use]
    pub fn find_by_prefix<'q>(&self, query: &'q str) -> Option<(&Plugin, &'q str)> {
        self.all()
            .filter(|p| p.is_openable())
            .filter_map(|p| p.strip_prefix(query).map(|rest| (p, rest)))
            .max_by_key(|(p, _)| p.manifest.prefix.as_ref().map_or(0, String::len))
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.plugin_order
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ExecutionContext, frecency_score, remember_term};
use crate::Result;
use crate::config::HistorySettings;
use crate::utils::DAY_MS;

const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum HistoryKind {
    App,
    Action,
    Workflow,
    WorkflowExecution,
    WebSearch,
    WindowFocus,
}

/// What was executed, before any counters are attached
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HistoryRecord {
    pub kind: HistoryKind,
    pub id: String,
    pub name: String,
    pub plugin_id: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    /// Request to replay when the entry is selected again
    pub entry_point: Option<Value>,
    pub keep_open: bool,
    /// Query for web searches
    pub query: Option<String>,
}

impl HistoryRecord {
    pub(crate) fn new(kind: HistoryKind, id: &str, name: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            name: name.to_string(),
            plugin_id: None,
            icon: None,
            description: None,
            entry_point: None,
            keep_open: false,
            query: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<Value>,
    #[serde(default)]
    pub keep_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Fractional once aging has scaled it
    pub count: f64,
    pub last_used: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_search_terms: Vec<String>,
}

impl HistoryEntry {
    fn from_record(record: HistoryRecord) -> Self {
        Self {
            kind: record.kind,
            id: record.id,
            name: record.name,
            plugin_id: record.plugin_id,
            icon: record.icon,
            description: record.description,
            entry_point: record.entry_point,
            keep_open: record.keep_open,
            query: record.query,
            count: 0.0,
            last_used: 0,
            recent_search_terms: Vec::new(),
        }
    }

    fn same_key(&self, record: &HistoryRecord) -> bool {
        self.kind == record.kind && self.id == record.id && self.plugin_id == record.plugin_id
    }

    pub(crate) fn frecency(&self, now: u64) -> f64 {
        frecency_score(self.count, self.last_used, now)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

/// Persisted log of executions from the global list
#[derive(Debug)]
pub(crate) struct HistoryLog {
    entries: Vec<HistoryEntry>,
    settings: HistorySettings,
    dirty: bool,
}

impl HistoryLog {
    pub(crate) fn new(settings: HistorySettings) -> Self {
        Self {
            entries: Vec::new(),
            settings,
            dirty: false,
        }
    }

    /// Read the log. A missing or corrupt file yields an empty log.
    pub(crate) fn load(path: &Path, settings: HistorySettings) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read history from {}: {}", path.display(), e);
                }
                return Self::new(settings);
            }
        };

        match serde_json::from_str::<HistoryFile>(&content) {
            Ok(file) => {
                info!("Loaded {} history entries", file.entries.len());
                Self {
                    entries: file.entries,
                    settings,
                    dirty: false,
                }
            }
            Err(e) => {
                warn!(
                    "Failed to parse history: {} (at line {}, column {})",
                    e,
                    e.line(),
                    e.column()
                );
                Self::new(settings)
            }
        }
    }

    /// Write the log if it changed since the last save.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub(crate) fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let file = HistoryFile {
            version: HISTORY_VERSION,
            entries: self.entries.clone(),
        };
        crate::index::write_atomic(path, &serde_json::to_string(&file)?)?;
        self.dirty = false;
        debug!("Saved {} history entries", self.entries.len());
        Ok(())
    }

    pub(crate) fn set_settings(&mut self, settings: HistorySettings) {
        self.settings = settings;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn find(
        &self,
        kind: HistoryKind,
        plugin_id: Option<&str>,
        id: &str,
    ) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.id == id && e.plugin_id.as_deref() == plugin_id)
    }

    /// Count one execution, then age and prune the log
    pub(crate) fn record(&mut self, record: HistoryRecord, context: &ExecutionContext) {
        let index = match self.entries.iter().position(|e| e.same_key(&record)) {
            Some(i) => {
                let entry = &mut self.entries[i];
                // Display fields follow the latest execution
                entry.name = record.name;
                entry.icon = record.icon.or(entry.icon.take());
                entry.description = record.description.or(entry.description.take());
                entry.entry_point = record.entry_point.or(entry.entry_point.take());
                entry.keep_open = record.keep_open;
                entry.query = record.query.or(entry.query.take());
                i
            }
            None => {
                self.entries.push(HistoryEntry::from_record(record));
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[index];
        entry.count += 1.0;
        entry.last_used = context.now;
        if let Some(term) = &context.search_term {
            remember_term(
                &mut entry.recent_search_terms,
                term,
                self.settings.max_search_terms,
            );
        }

        self.age();
        self.prune(context.now);
        self.dirty = true;
    }

    pub(crate) fn total_count(&self) -> f64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Scale every count so the total lands at 90% of the ceiling
    fn age(&mut self) {
        let ceiling = self.settings.score_ceiling;
        let total = self.total_count();
        if ceiling <= 0.0 || total <= ceiling {
            return;
        }
        let factor = 0.9 * ceiling / total;
        for entry in &mut self.entries {
            entry.count *= factor;
        }
        debug!("Aged history by {:.3} (total was {:.1})", factor, total);
    }

    /// Drop entries that are both old and scaled below one use
    fn prune(&mut self, now: u64) {
        let max_age = self.settings.max_age_days.saturating_mul(DAY_MS);
        let before = self.entries.len();
        self.entries
            .retain(|e| e.count >= 1.0 || now.saturating_sub(e.last_used) <= max_age);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            debug!("Pruned {} stale history entries", pruned);
        }
    }

    /// Most recently used first
    pub(crate) fn recent(&self, limit: usize) -> Vec<&HistoryEntry> {
        let mut entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        entries.truncate(limit);
        entries
    }
}

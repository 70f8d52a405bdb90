//! Test fixtures and helpers

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use crate::config::{Config, Directories};
use crate::search::{Searchable, SearchableSource};
use crate::{CoreChannels, LumenCore};
use lumen_types::{CoreEvent, CoreUpdate, ResultItem};

const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Create a bare `ResultItem`
pub fn make_index_item(id: &str, name: &str) -> ResultItem {
    ResultItem {
        id: id.to_string(),
        name: name.to_string(),
        verb: Some("Open".to_string()),
        ..Default::default()
    }
}

/// Create an indexed-item searchable
pub fn make_searchable(plugin_id: &str, id: &str, name: &str) -> Searchable {
    Searchable::new(SearchableSource::IndexedItem, plugin_id, id, name)
}

/// Create a plugin-entry searchable
pub fn make_plugin_searchable(id: &str, name: &str) -> Searchable {
    Searchable::new(SearchableSource::Plugin, id, id, name)
}

/// Write `<root>/<id>/manifest.json` and, if given, an executable
/// `handler` shell script. The manifest is made valid for every platform.
pub fn write_plugin(root: &Path, id: &str, mut manifest: Value, script: Option<&str>) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    manifest["supportedPlatforms"] = serde_json::json!(["*"]);
    fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();

    if let Some(script) = script {
        let path = dir.join("handler");
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Shell line printing a `results` response with one row
pub fn results_line(id: &str, name: &str) -> String {
    format!(r#"echo '{{"type":"results","results":[{{"id":"{id}","name":"{name}"}}]}}'"#)
}

/// A core over a temp directory, with its channels
pub struct TestCore {
    pub core: LumenCore,
    pub channels: CoreChannels,
    pub dir: TempDir,
}

/// Build a core after `setup` has written plugins into the user plugin dir
pub fn make_core(config: Config, setup: impl FnOnce(&Path)) -> TestCore {
    let dir = TempDir::new().unwrap();
    let dirs = Directories::with_base(dir.path().to_path_buf());
    fs::create_dir_all(&dirs.user_plugins).unwrap();
    setup(&dirs.user_plugins);

    let (core, channels) = LumenCore::new(dirs, config).unwrap();
    TestCore {
        core,
        channels,
        dir,
    }
}

impl TestCore {
    pub fn send(&mut self, event: CoreEvent) {
        self.core.process(event);
    }

    /// Updates emitted so far
    pub fn drain(&mut self) -> Vec<CoreUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.channels.updates.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Feed background work into the core until an update matching `pred`
    /// is emitted
    pub async fn wait_for(&mut self, pred: impl Fn(&CoreUpdate) -> bool) -> CoreUpdate {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            while let Ok(update) = self.channels.updates.try_recv() {
                if pred(&update) {
                    return update;
                }
            }
            let message = tokio::time::timeout_at(deadline, self.channels.internal.recv())
                .await
                .expect("timed out waiting for an update")
                .expect("core message channel closed");
            self.core.handle_message(message);
        }
    }

    /// Handle background messages until `done` holds
    pub async fn pump_until(&mut self, done: impl Fn(&LumenCore) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while !done(&self.core) {
            let message = tokio::time::timeout_at(deadline, self.channels.internal.recv())
                .await
                .expect("timed out waiting for the core")
                .expect("core message channel closed");
            self.core.handle_message(message);
        }
    }
}

/// Ids of a `Results` update
pub fn result_ids(update: &CoreUpdate) -> Vec<&str> {
    match update {
        CoreUpdate::Results { results, .. } => results.iter().map(|r| r.id.as_str()).collect(),
        _ => Vec::new(),
    }
}

pub fn has_result(update: &CoreUpdate, id: &str) -> bool {
    result_ids(update).contains(&id)
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    crate::utils::now_millis()
}

/// Get timestamp for N hours ago
pub fn hours_ago(hours: u64) -> u64 {
    now_millis().saturating_sub(hours * crate::utils::HOUR_MS)
}

/// Get timestamp for N days ago
pub fn days_ago(days: u64) -> u64 {
    now_millis().saturating_sub(days * crate::utils::DAY_MS)
}

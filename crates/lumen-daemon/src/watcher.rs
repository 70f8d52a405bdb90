//! File watchers for plugin and config hot reload.
//!
//! `notify` delivers events on its own thread. Bursts are debounced there and
//! forwarded as a single [`WatchEvent`] on a tokio channel.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info};

use crate::error::Result;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Editors write config files in several steps
const CONFIG_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    PluginsChanged,
    ConfigChanged,
}

/// Keeps the watcher threads alive
pub struct WatcherHandle {
    _threads: Vec<std::thread::JoinHandle<()>>,
}

/// Watch plugin directories (recursively) and the config file.
/// Directories that do not exist are skipped.
#[must_use]
pub fn spawn_watchers(
    plugin_dirs: Vec<PathBuf>,
    config_file: PathBuf,
    tx: tokio_mpsc::UnboundedSender<WatchEvent>,
) -> WatcherHandle {
    let plugin_tx = tx.clone();
    let plugins = std::thread::spawn(move || {
        if let Err(e) = watch_plugin_dirs(&plugin_dirs, &plugin_tx) {
            error!("Plugin watcher error: {}", e);
        }
    });

    let config = std::thread::spawn(move || {
        if let Err(e) = watch_config_file(&config_file, &tx) {
            error!("Config watcher error: {}", e);
        }
    });

    WatcherHandle {
        _threads: vec![plugins, config],
    }
}

fn is_content_change(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Whether an event touches the watched config file
fn touches_file(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

/// Run `notify` until the receiving side goes away, passing each debounced
/// relevant event on as `signal`
fn run_watcher(
    targets: &[(&Path, RecursiveMode)],
    relevant: impl Fn(&Event) -> bool + Send + 'static,
    settle: Duration,
    signal: WatchEvent,
    tx: &tokio_mpsc::UnboundedSender<WatchEvent>,
) -> Result<()> {
    let (raw_tx, raw_rx) = mpsc::channel::<()>();
    let mut last = Instant::now().checked_sub(DEBOUNCE).unwrap_or_else(Instant::now);

    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) if is_content_change(event.kind) && relevant(&event) => {
                let now = Instant::now();
                if now.duration_since(last) > DEBOUNCE {
                    last = now;
                    let _ = raw_tx.send(());
                }
            }
            Ok(_) => {}
            Err(e) => error!("Watcher error: {}", e),
        })?;

    for (path, mode) in targets {
        watcher.watch(path, *mode)?;
        info!("Watching {}", path.display());
    }

    while raw_rx.recv().is_ok() {
        std::thread::sleep(settle);
        debug!("{:?}", signal);
        if tx.send(signal).is_err() {
            debug!("Watch receiver dropped, stopping watcher");
            break;
        }
    }
    Ok(())
}

fn watch_plugin_dirs(dirs: &[PathBuf], tx: &tokio_mpsc::UnboundedSender<WatchEvent>) -> Result<()> {
    let targets: Vec<(&Path, RecursiveMode)> = dirs
        .iter()
        .filter(|d| d.is_dir())
        .map(|d| (d.as_path(), RecursiveMode::Recursive))
        .collect();
    if targets.is_empty() {
        debug!("No plugin directories to watch");
        return Ok(());
    }
    run_watcher(
        &targets,
        |_| true,
        Duration::ZERO,
        WatchEvent::PluginsChanged,
        tx,
    )
}

fn watch_config_file(path: &Path, tx: &tokio_mpsc::UnboundedSender<WatchEvent>) -> Result<()> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid config path {}", path.display()),
        )
        .into());
    };
    let file_name = file_name.to_os_string();
    run_watcher(
        &[(parent, RecursiveMode::NonRecursive)],
        move |event| touches_file(event, &file_name),
        CONFIG_SETTLE,
        WatchEvent::ConfigChanged,
        tx,
    )
}

//! Lifecycle of daemon plugins.
//!
//! Per plugin: `Stopped -> Starting -> Running -> (Crashed -> Restarting ->
//! Running) | Stopped`, with `Dead` once restarts are exhausted. Every spawned
//! process gets a fresh generation number; events from an older generation
//! are ignored, so a killed process can never trigger a restart.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::DaemonSettings;
use crate::engine::CoreMessage;
use crate::plugin::{HandlerType, Plugin, PluginInput};
use crate::transport::{DaemonHandle, EventSink};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DaemonState {
    #[default]
    Stopped,
    Starting,
    Running,
    Crashed,
    Restarting,
    /// Restart budget exhausted; stays dead until plugins are reloaded
    Dead,
}

impl DaemonState {
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// When a crashed daemon may be restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RestartPolicy {
    pub restart_on_crash: bool,
    /// 0 means unlimited
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub(crate) fn for_plugin(plugin: &Plugin, settings: &DaemonSettings) -> Self {
        let config = plugin.manifest.daemon.as_ref();
        Self {
            restart_on_crash: config.is_some_and(|d| d.restart_on_crash),
            max_restarts: config
                .and_then(|d| d.max_restarts)
                .unwrap_or(settings.default_max_restarts),
        }
    }

    pub(crate) fn should_restart(self, restart_count: u32) -> bool {
        self.restart_on_crash && (self.max_restarts == 0 || restart_count < self.max_restarts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitOutcome {
    /// Stale generation or already handled
    Ignored,
    Restarting { attempt: u32 },
    Dead,
}

struct DaemonEntry {
    state: DaemonState,
    restart_count: u32,
    generation: u64,
    spawned_at: Instant,
    handle: Option<DaemonHandle>,
    is_background: bool,
    session_token: String,
    policy: RestartPolicy,
}

pub(crate) struct DaemonSupervisor {
    entries: HashMap<String, DaemonEntry>,
    settings: DaemonSettings,
    tx: mpsc::UnboundedSender<CoreMessage>,
    next_generation: u64,
}

impl DaemonSupervisor {
    pub(crate) fn new(settings: DaemonSettings, tx: mpsc::UnboundedSender<CoreMessage>) -> Self {
        Self {
            entries: HashMap::new(),
            settings,
            tx,
            next_generation: 1,
        }
    }

    pub(crate) fn set_settings(&mut self, settings: DaemonSettings) {
        self.settings = settings;
    }

    /// Start a daemon unless one is already live or restarting. Returns
    /// whether a process was spawned.
    ///
    /// # Errors
    ///
    /// Returns `Error::DaemonUnavailable` for a dead daemon, or the spawn error.
    pub(crate) fn start(&mut self, plugin: &Plugin, session_token: &str) -> Result<bool> {
        if let Some(entry) = self.entries.get_mut(&plugin.id) {
            match entry.state {
                DaemonState::Dead => return Err(Error::DaemonUnavailable(plugin.id.clone())),
                DaemonState::Starting
                | DaemonState::Running
                | DaemonState::Crashed
                | DaemonState::Restarting => {
                    entry.session_token = session_token.to_string();
                    return Ok(false);
                }
                DaemonState::Stopped => {}
            }
        }

        let generation = self.bump_generation();
        let handle = self.spawn(plugin, generation)?;
        let state = initial_state(plugin);

        self.entries.insert(
            plugin.id.clone(),
            DaemonEntry {
                state,
                restart_count: 0,
                generation,
                spawned_at: Instant::now(),
                handle: Some(handle),
                is_background: plugin.is_background_daemon(),
                session_token: session_token.to_string(),
                policy: RestartPolicy::for_plugin(plugin, &self.settings),
            },
        );
        info!("[{}] Started daemon (generation {})", plugin.id, generation);
        Ok(true)
    }

    fn spawn(&self, plugin: &Plugin, generation: u64) -> Result<DaemonHandle> {
        let sink = EventSink::new(&plugin.id, generation, self.tx.clone());
        DaemonHandle::spawn(plugin, sink, self.settings.socket_connect_timeout())
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Stop a daemon on request. A dead daemon stays dead.
    pub(crate) fn stop(&mut self, plugin_id: &str) {
        let Some(entry) = self.entries.get_mut(plugin_id) else {
            return;
        };
        if let Some(handle) = entry.handle.take() {
            handle.stop();
            info!("[{}] Stopped daemon", plugin_id);
        }
        if entry.state != DaemonState::Dead {
            entry.state = DaemonState::Stopped;
            entry.restart_count = 0;
        }
    }

    pub(crate) fn stop_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Forget everything about a plugin, including a dead state
    pub(crate) fn forget(&mut self, plugin_id: &str) {
        self.stop(plugin_id);
        self.entries.remove(plugin_id);
    }

    /// Queue a request for a live daemon.
    ///
    /// # Errors
    ///
    /// Returns `Error::DaemonUnavailable` if the daemon is not live.
    pub(crate) fn send(&self, plugin_id: &str, input: &PluginInput) -> Result<()> {
        let entry = self
            .entries
            .get(plugin_id)
            .filter(|e| e.state.is_live())
            .ok_or_else(|| Error::DaemonUnavailable(plugin_id.to_string()))?;
        let handle = entry
            .handle
            .as_ref()
            .ok_or_else(|| Error::DaemonUnavailable(plugin_id.to_string()))?;
        handle.send(input)
    }

    pub(crate) fn is_current(&self, plugin_id: &str, generation: u64) -> bool {
        self.entries
            .get(plugin_id)
            .is_some_and(|e| e.generation == generation && e.state.is_live())
    }

    pub(crate) fn on_connected(&mut self, plugin_id: &str, generation: u64) {
        if let Some(entry) = self.entries.get_mut(plugin_id)
            && entry.generation == generation
            && entry.state == DaemonState::Starting
        {
            entry.state = DaemonState::Running;
            debug!("[{}] Daemon running", plugin_id);
        }
    }

    /// Apply the restart policy to an exit, disconnect or failed connect.
    /// Only live generations get here, and `stop` makes a daemon not live, so
    /// every exit seen is one nobody asked for.
    pub(crate) fn on_exit(
        &mut self,
        plugin_id: &str,
        generation: u64,
        reason: &str,
    ) -> ExitOutcome {
        let stable_uptime = self.settings.stable_uptime();
        let Some(entry) = self.entries.get_mut(plugin_id) else {
            return ExitOutcome::Ignored;
        };
        if entry.generation != generation || !entry.state.is_live() {
            return ExitOutcome::Ignored;
        }

        warn!("[{}] Daemon crashed: {}", plugin_id, reason);
        // Only consecutive crashes count against the limit
        if entry.restart_count > 0 && entry.spawned_at.elapsed() >= stable_uptime {
            debug!(
                "[{}] Up for {:?}, clearing {} earlier restarts",
                plugin_id,
                entry.spawned_at.elapsed(),
                entry.restart_count
            );
            entry.restart_count = 0;
        }
        if let Some(handle) = entry.handle.take() {
            handle.stop();
        }
        entry.state = DaemonState::Crashed;
        self.after_crash(plugin_id)
    }

    fn after_crash(&mut self, plugin_id: &str) -> ExitOutcome {
        let delay = self.settings.restart_delay();
        let Some(entry) = self.entries.get_mut(plugin_id) else {
            return ExitOutcome::Ignored;
        };

        if !entry.policy.should_restart(entry.restart_count) {
            error!(
                "[{}] Daemon dead after {} restarts",
                plugin_id, entry.restart_count
            );
            entry.state = DaemonState::Dead;
            return ExitOutcome::Dead;
        }

        entry.restart_count += 1;
        entry.state = DaemonState::Restarting;
        let attempt = entry.restart_count;
        let generation = entry.generation;
        info!(
            "[{}] Restarting in {:?} (attempt {})",
            plugin_id, delay, attempt
        );

        let tx = self.tx.clone();
        let id = plugin_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMessage::RestartDue {
                plugin_id: id,
                generation,
            });
        });

        ExitOutcome::Restarting { attempt }
    }

    /// Backoff elapsed: spawn the replacement process. A failed spawn counts
    /// as another crash.
    pub(crate) fn on_restart_due(
        &mut self,
        plugin: &Plugin,
        generation: u64,
    ) -> ExitOutcome {
        let Some(entry) = self.entries.get(&plugin.id) else {
            return ExitOutcome::Ignored;
        };
        if entry.generation != generation || entry.state != DaemonState::Restarting {
            return ExitOutcome::Ignored;
        }

        let new_generation = self.bump_generation();
        let spawned = self.spawn(plugin, new_generation);
        let Some(entry) = self.entries.get_mut(&plugin.id) else {
            return ExitOutcome::Ignored;
        };
        entry.generation = new_generation;

        match spawned {
            Ok(handle) => {
                entry.handle = Some(handle);
                entry.spawned_at = Instant::now();
                entry.state = initial_state(plugin);
                info!(
                    "[{}] Restarted daemon (generation {})",
                    plugin.id, new_generation
                );
                ExitOutcome::Restarting {
                    attempt: entry.restart_count,
                }
            }
            Err(e) => {
                warn!("[{}] Restart failed: {}", plugin.id, e);
                entry.state = DaemonState::Crashed;
                self.after_crash(&plugin.id)
            }
        }
    }

    #[must_use]
    pub(crate) fn state(&self, plugin_id: &str) -> DaemonState {
        self.entries
            .get(plugin_id)
            .map_or(DaemonState::Stopped, |e| e.state)
    }

    #[must_use]
    pub(crate) fn restart_count(&self, plugin_id: &str) -> u32 {
        self.entries.get(plugin_id).map_or(0, |e| e.restart_count)
    }

    #[must_use]
    pub(crate) fn is_background(&self, plugin_id: &str) -> bool {
        self.entries.get(plugin_id).is_some_and(|e| e.is_background)
    }

    #[must_use]
    pub(crate) fn session_token(&self, plugin_id: &str) -> Option<&str> {
        self.entries
            .get(plugin_id)
            .map(|e| e.session_token.as_str())
    }

    #[must_use]
    pub(crate) fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state.is_live())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub(crate) fn unavailable(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == DaemonState::Dead)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn initial_state(plugin: &Plugin) -> DaemonState {
    match plugin.manifest.handler_type() {
        HandlerType::Stdio => DaemonState::Running,
        HandlerType::Socket => DaemonState::Starting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(restart_on_crash: bool, max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            restart_on_crash,
            max_restarts,
        }
    }

    #[test]
    fn no_restart_without_flag() {
        assert!(!policy(false, 0).should_restart(0));
    }

    #[test]
    fn bounded_restarts() {
        let p = policy(true, 3);
        assert!(p.should_restart(0));
        assert!(p.should_restart(2));
        assert!(!p.should_restart(3));
    }

    #[test]
    fn zero_means_unlimited() {
        assert!(policy(true, 0).should_restart(10_000));
    }

    #[test]
    fn live_states() {
        assert!(DaemonState::Starting.is_live());
        assert!(DaemonState::Running.is_live());
        assert!(!DaemonState::Restarting.is_live());
        assert!(!DaemonState::Dead.is_live());
    }
}

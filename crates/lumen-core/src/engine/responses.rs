//! Applying handler responses to the front end and the stores.

use tracing::{debug, info, warn};

use super::LumenCore;
use crate::plugin::{ExecuteData, IndexMode, PluginResponse};
use lumen_types::{CoreUpdate, ExecuteAction, GridBrowserData, ImageBrowserData, PluginStatus};

impl LumenCore {
    pub(super) fn apply_side_outputs(&mut self, plugin_id: &str, outputs: Vec<PluginResponse>) {
        for output in outputs {
            self.apply_side_output(plugin_id, output);
        }
    }

    /// Apply an `index` or `status` line, whichever plugin sent it
    pub(super) fn apply_side_output(&mut self, plugin_id: &str, output: PluginResponse) {
        match output {
            PluginResponse::Index {
                items,
                mode,
                remove,
                status,
            } => {
                if self.plugins.get(plugin_id).is_none() {
                    debug!("[{}] Ignoring index from unknown plugin", plugin_id);
                    return;
                }
                let mode = mode.unwrap_or(IndexMode::Full);
                match self.index.apply_index(plugin_id, mode, items, &remove) {
                    Ok(_) => self.schedule_flush(),
                    Err(e) => warn!("[{}] Rejected index update: {}", plugin_id, e),
                }
                if let Some(status) = status {
                    self.apply_status(plugin_id, status);
                }
            }
            PluginResponse::Status { status } => self.apply_status(plugin_id, status),
            other => debug!(
                "[{}] Ignoring '{}' outside a request",
                plugin_id,
                other.type_name()
            ),
        }
    }

    /// Apply the answer to a request of the active session
    pub(super) fn apply_session_response(&mut self, response: PluginResponse) {
        let hints = response.nav_hints();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let plugin_id = session.plugin_id.clone();

        match response {
            PluginResponse::Results(results) => {
                let depth = hints.map(|h| session.navigator.on_view(h));
                let rows: Vec<_> = results
                    .results
                    .into_iter()
                    .map(|r| r.with_plugin_id(&plugin_id))
                    .collect();
                session.results.clone_from(&rows);
                let context_changed = results.context.is_some() && results.context != session.context;
                if context_changed {
                    session.context.clone_from(&results.context);
                }
                let mode_changed = results
                    .input_mode
                    .is_some_and(|mode| mode != session.input_mode);
                if let Some(mode) = results.input_mode {
                    session.input_mode = mode;
                }

                self.emit(CoreUpdate::Results {
                    results: rows,
                    placeholder: results.placeholder,
                    clear_input: results.clear_input,
                    input_mode: results.input_mode,
                    context: results.context.clone(),
                });
                if context_changed {
                    self.emit(CoreUpdate::ContextChanged {
                        context: results.context,
                    });
                }
                if mode_changed && let Some(mode) = results.input_mode {
                    self.emit(CoreUpdate::InputModeChanged { mode });
                }
                if let Some(depth) = depth {
                    self.emit(CoreUpdate::NavigationDepthChanged { depth });
                }
                self.emit(CoreUpdate::PluginActionsUpdate {
                    actions: results.plugin_actions,
                });
                if let Some(message) = results.notify {
                    self.emit(CoreUpdate::Execute {
                        action: ExecuteAction::Notify { message },
                    });
                }
                self.apply_optional_status(&plugin_id, results.status);
            }
            PluginResponse::Card(card) => {
                let depth = hints.map(|h| session.navigator.on_view(h));
                if card.context.is_some() {
                    session.context.clone_from(&card.context);
                }
                self.emit(CoreUpdate::Card {
                    card: card.card,
                    context: card.context,
                });
                if let Some(depth) = depth {
                    self.emit(CoreUpdate::NavigationDepthChanged { depth });
                }
                self.apply_optional_status(&plugin_id, card.status);
            }
            PluginResponse::Form(form) => {
                let depth = hints.map(|h| session.navigator.on_view(h));
                if form.context.is_some() {
                    session.context.clone_from(&form.context);
                }
                self.emit(CoreUpdate::Form { form: form.form });
                if let Some(depth) = depth {
                    self.emit(CoreUpdate::NavigationDepthChanged { depth });
                }
            }
            PluginResponse::ImageBrowser {
                images,
                title,
                directory,
            } => {
                session.navigator.on_non_view();
                self.emit(CoreUpdate::ImageBrowser {
                    browser: ImageBrowserData {
                        directory,
                        images,
                        title,
                    },
                });
            }
            PluginResponse::GridBrowser {
                items,
                title,
                columns,
            } => {
                session.navigator.on_non_view();
                self.emit(CoreUpdate::GridBrowser {
                    browser: GridBrowserData {
                        items,
                        title,
                        columns,
                    },
                });
            }
            PluginResponse::Prompt { prompt } => {
                session.navigator.on_non_view();
                self.emit(CoreUpdate::Prompt {
                    prompt: prompt.text,
                });
            }
            PluginResponse::Execute(data) => {
                session.navigator.on_non_view();
                self.run_execute(&plugin_id, &data);
            }
            PluginResponse::Update { items, status } => {
                session.apply_patches(&items);
                self.emit(CoreUpdate::ResultsUpdate { patches: items });
                self.apply_optional_status(&plugin_id, status);
            }
            PluginResponse::Error { message, details } => {
                session.navigator.on_non_view();
                warn!(
                    "[{}] Plugin error: {}{}",
                    plugin_id,
                    message,
                    details.map(|d| format!(" ({d})")).unwrap_or_default()
                );
                self.emit(CoreUpdate::Error { message });
            }
            PluginResponse::Match { .. } | PluginResponse::Noop => {
                session.navigator.on_non_view();
            }
            side @ (PluginResponse::Index { .. } | PluginResponse::Status { .. }) => {
                self.apply_side_output(&plugin_id, side);
            }
        }
    }

    fn apply_optional_status(&mut self, plugin_id: &str, status: Option<PluginStatus>) {
        if let Some(status) = status {
            self.apply_status(plugin_id, status);
        }
    }

    /// Emit each side effect, then hide the launcher unless asked not to
    pub(super) fn run_execute(&mut self, plugin_id: &str, data: &ExecuteData) {
        let actions = data.actions();
        debug!("[{}] Executing {} actions", plugin_id, actions.len());
        for action in actions {
            self.emit(CoreUpdate::Execute { action });
        }
        if data.should_close() {
            self.close_launcher();
        }
    }

    /// Apply a response that arrived outside the active session: a replayed
    /// entry point or an unprompted daemon push
    pub(super) fn apply_detached_response(
        &mut self,
        plugin_id: &str,
        response: PluginResponse,
        from_replay: bool,
    ) {
        match response {
            PluginResponse::Execute(data) => self.run_execute(plugin_id, &data),
            PluginResponse::Error { message, .. } => {
                warn!("[{}] Plugin error: {}", plugin_id, message);
                self.emit(CoreUpdate::Error { message });
            }
            view if from_replay && view.nav_hints().is_some() => {
                if self.is_open && self.session.is_none() {
                    self.adopt_replay_view(plugin_id, view);
                } else {
                    debug!("[{}] Dropping replayed view, launcher moved on", plugin_id);
                }
            }
            side @ (PluginResponse::Index { .. } | PluginResponse::Status { .. }) => {
                self.apply_side_output(plugin_id, side);
            }
            other => debug!(
                "[{}] Ignoring detached '{}' response",
                plugin_id,
                other.type_name()
            ),
        }
    }

    /// A replay answered with a view: open the plugin around it
    fn adopt_replay_view(&mut self, plugin_id: &str, view: PluginResponse) {
        let Some(plugin) = self.plugins.get(plugin_id).cloned() else {
            return;
        };
        if !self.activate(&plugin) {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.navigator.enter_replay();
        }
        info!("[{}] Replay opened a view", plugin_id);
        self.apply_session_response(view);
    }
}

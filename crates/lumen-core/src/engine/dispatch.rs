//! Opening and closing plugins, sending requests, and routing what comes
//! back from handler processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CoreMessage, LumenCore, RequestTag};
use crate::frecency::ExecutionContext;
use crate::index::PLUGIN_ENTRY_ID;
use crate::navigation::{BACK_ID, EscapeOutcome, PendingNav, is_reserved_id, pending_for_selection};
use crate::plugin::{HandlerType, IndexMode, Plugin, PluginInput, PluginResponse};
use crate::session::{InFlight, QueuedRequest, Session, StartedRequest};
use crate::supervisor::{DaemonState, ExitOutcome};
use crate::transport::{DaemonEvent, OneShotOutput, run_oneshot};
use crate::utils::now_millis;
use crate::{Error, Result};
use lumen_types::{CoreUpdate, InputMode};

impl LumenCore {
    /// Activate a plugin, closing any other, and send its `initial` step.
    /// A non-empty `query` follows as a `search` step.
    pub(super) fn open_plugin(&mut self, plugin_id: &str, query: Option<String>) {
        let Some(plugin) = self.plugins.get(plugin_id).cloned() else {
            warn!("[{}] Cannot open unknown plugin", plugin_id);
            self.emit(CoreUpdate::Error {
                message: format!("Plugin not found: {plugin_id}"),
            });
            return;
        };
        if !plugin.is_openable() {
            warn!("[{}] Plugin has no handler to open", plugin_id);
            self.emit(CoreUpdate::Error {
                message: format!("{} cannot be opened", plugin.manifest.name),
            });
            return;
        }

        if !self.activate(&plugin) {
            return;
        }

        self.send_request(QueuedRequest::new(PluginInput::initial(), None));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            if let Some(session) = self.session.as_mut() {
                session.query.clone_from(&query);
            }
            self.send_request(QueuedRequest::new(PluginInput::search(query), None));
        }
    }

    /// Replace the active session with a fresh one for `plugin`, starting its
    /// daemon if it has one. Nothing is sent yet.
    pub(super) fn activate(&mut self, plugin: &Plugin) -> bool {
        if self.session.is_some() {
            self.end_session();
        }

        let session = Session::new(plugin, self.config.navigation.double_escape());
        if plugin.is_daemon() {
            match self.supervisor.start(plugin, &session.token) {
                Ok(spawned) => debug!("[{}] Daemon ready (spawned: {})", plugin.id, spawned),
                Err(e) => {
                    warn!("[{}] Failed to start daemon: {}", plugin.id, e);
                    self.emit(CoreUpdate::Error {
                        message: e.to_string(),
                    });
                    return false;
                }
            }
        }

        info!("[{}] Opened (session {})", plugin.id, session.token);
        self.emit(CoreUpdate::PluginActivated {
            id: plugin.id.clone(),
            name: plugin.manifest.name.clone(),
            icon: Some(plugin.icon()),
        });
        if let Some(mode) = plugin.manifest.input_mode {
            self.emit(CoreUpdate::InputModeChanged { mode });
        }
        self.session = Some(session);
        self.global.clear();
        true
    }

    /// Tear down the active session without touching the visible list.
    /// Non-background daemons die with their session.
    pub(super) fn end_session(&mut self) -> Option<Session> {
        let mut session = self.session.take()?;
        session.abort();

        let is_daemon = self
            .plugins
            .get(&session.plugin_id)
            .is_some_and(Plugin::is_daemon);
        if is_daemon && !self.supervisor.is_background(&session.plugin_id) {
            self.supervisor.stop(&session.plugin_id);
        }
        info!("[{}] Closed", session.plugin_id);
        Some(session)
    }

    /// Close the active plugin and return to the global list
    pub(super) fn close_plugin(&mut self) {
        if self.end_session().is_none() {
            return;
        }
        self.emit(CoreUpdate::Busy { busy: false });
        self.emit(CoreUpdate::PluginDeactivated);
        if self.is_open {
            self.show_global(String::new());
        }
    }

    /// Hide the launcher, ending any session
    pub(super) fn close_launcher(&mut self) {
        if self.end_session().is_some() {
            self.emit(CoreUpdate::PluginDeactivated);
        }
        self.is_open = false;
        self.global.clear();
        self.emit(CoreUpdate::Close);
    }

    /// Send a request to the active session, or queue it behind the one in
    /// flight
    pub(super) fn send_request(&mut self, mut request: QueuedRequest) {
        let Some(session) = self.session.as_mut() else {
            debug!("No active plugin for {} step", request.input.step.as_str());
            return;
        };
        if request.input.context.is_none() {
            request.input.context.clone_from(&session.context);
        }
        match session.submit(request) {
            Some(started) => self.dispatch(started),
            None => debug!(
                "[{}] Request queued ({} waiting)",
                session.plugin_id,
                session.queued()
            ),
        }
    }

    fn dispatch(&mut self, request: StartedRequest) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let plugin_id = session.plugin_id.clone();
        let tag = RequestTag::Session {
            token: session.token.clone(),
            seq: request.seq,
        };
        let Some(plugin) = self.plugins.get(&plugin_id) else {
            warn!("[{}] Active plugin disappeared", plugin_id);
            return;
        };

        if request.busy {
            self.emit(CoreUpdate::Busy { busy: true });
        }
        debug!("[{}] Sending {} step", plugin_id, request.input.step.as_str());

        if plugin.is_daemon() {
            if let Err(e) = self.supervisor.send(&plugin_id, &request.input) {
                self.fail_in_flight(&e);
            }
            return;
        }

        match self.spawn_oneshot(plugin, request.input, tag) {
            Some(task) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_task(task);
                }
            }
            None => self.fail_in_flight(&Error::Plugin(format!("{plugin_id} has no handler"))),
        }
    }

    /// Run the plugin's handler once in the background. Aborting the returned
    /// handle kills the process.
    pub(super) fn spawn_oneshot(
        &self,
        plugin: &Plugin,
        input: PluginInput,
        tag: RequestTag,
    ) -> Option<AbortHandle> {
        let Some(command) = plugin.command.clone() else {
            warn!("[{}] No handler to run", plugin.id);
            return None;
        };
        let plugin_id = plugin.id.clone();
        let working_dir = plugin.path.clone();
        let tx = self.msg_tx.clone();

        let task = tokio::spawn(async move {
            let result = run_oneshot(&plugin_id, &command, &working_dir, &input).await;
            let _ = tx.send(CoreMessage::OneShotFinished {
                plugin_id,
                tag,
                result,
            });
        });
        Some(task.abort_handle())
    }

    /// The in-flight request could not be delivered. Drops anything queued
    /// behind it.
    fn fail_in_flight(&mut self, error: &Error) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.clear_queue();
        let finished = session.finish(None);
        self.surface_error(error);
        if finished.is_some_and(|f| f.busy) {
            self.emit(CoreUpdate::Busy { busy: false });
        }
    }

    pub(super) fn surface_error(&mut self, error: &Error) {
        if let Some(session) = self.session.as_mut() {
            warn!("[{}] Request failed: {}", session.plugin_id, error);
            session.navigator.on_non_view();
        }
        self.emit(CoreUpdate::Error {
            message: error.to_string(),
        });
    }

    /// Bookkeeping after the active session's request was answered: clear
    /// busy, then send the next queued request or arm the poll timer
    fn request_done(&mut self, finished: InFlight) {
        if finished.busy {
            self.emit(CoreUpdate::Busy { busy: false });
        }
        match self.session.as_mut().and_then(Session::next_request) {
            Some(next) => self.dispatch(next),
            None => self.arm_poll(),
        }
    }

    fn arm_poll(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_idle() {
            return;
        }
        let Some(interval) = self
            .plugins
            .get(&session.plugin_id)
            .and_then(|p| p.manifest.poll)
            .filter(|ms| *ms > 0)
        else {
            return;
        };

        let seq = session.next_poll();
        let token = session.token.clone();
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(interval)).await;
            let _ = tx.send(CoreMessage::PollDue { token, seq });
        });
    }

    pub(super) fn on_poll_due(&mut self, token: &str, seq: u64) {
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| s.token == token && s.is_poll_current(seq) && s.is_idle());
        if due {
            self.send_request(QueuedRequest::quiet(PluginInput::poll()));
        }
    }

    pub(super) fn on_oneshot_finished(
        &mut self,
        plugin_id: &str,
        tag: RequestTag,
        result: Result<OneShotOutput>,
    ) {
        match tag {
            RequestTag::Session { token, seq } => {
                self.on_session_output(plugin_id, &token, seq, result);
            }
            RequestTag::Replay => match result {
                Ok(output) => {
                    self.apply_side_outputs(plugin_id, output.side);
                    self.apply_detached_response(plugin_id, output.primary, true);
                }
                Err(e) => {
                    warn!("[{}] Replay failed: {}", plugin_id, e);
                    self.emit(CoreUpdate::Error {
                        message: e.to_string(),
                    });
                }
            },
            RequestTag::Index => match result {
                Ok(output) => {
                    self.apply_side_outputs(plugin_id, output.side);
                    if let PluginResponse::Error { message, .. } = output.primary {
                        warn!("[{}] Index request failed: {}", plugin_id, message);
                    }
                }
                Err(e) => warn!("[{}] Index request failed: {}", plugin_id, e),
            },
            RequestTag::Match { seq } => self.on_match_output(plugin_id, seq, result),
        }
    }

    fn on_session_output(
        &mut self,
        plugin_id: &str,
        token: &str,
        seq: u64,
        result: Result<OneShotOutput>,
    ) {
        let finished = self
            .session
            .as_mut()
            .filter(|s| s.token == token)
            .and_then(|s| s.finish(Some(seq)));
        let Some(finished) = finished else {
            debug!("[{}] Dropping response for a finished request", plugin_id);
            if let Ok(output) = result {
                self.apply_side_outputs(plugin_id, output.side);
            }
            return;
        };

        match result {
            Ok(output) => {
                self.apply_side_outputs(plugin_id, output.side);
                self.apply_session_response(output.primary);
            }
            Err(e) => self.surface_error(&e),
        }
        self.request_done(finished);
    }

    pub(super) fn on_daemon_event(&mut self, plugin_id: &str, generation: u64, event: DaemonEvent) {
        match event {
            DaemonEvent::Connected => self.supervisor.on_connected(plugin_id, generation),
            DaemonEvent::ConnectFailed(reason) => self.on_daemon_down(
                plugin_id,
                generation,
                format!("socket connect failed: {reason}"),
            ),
            DaemonEvent::Disconnected => {
                if self.supervisor.is_current(plugin_id, generation) {
                    warn!(
                        "[{}] Socket closed without a process exit, handling as a crash",
                        plugin_id
                    );
                }
                self.on_daemon_down(
                    plugin_id,
                    generation,
                    "socket disconnected".to_string(),
                );
            }
            DaemonEvent::Exited { code } => {
                // Stopped daemons are no longer current, so any exit seen here
                // was not asked for, code 0 included
                let reason = match code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                };
                self.on_daemon_down(plugin_id, generation, reason);
            }
            DaemonEvent::BadOutput(reason) => {
                // The in-flight request stays pending until a valid line answers it
                if self.supervisor.is_current(plugin_id, generation) {
                    warn!("[{}] Dropped malformed output: {}", plugin_id, reason);
                }
            }
            DaemonEvent::RequestFailed(reason) => {
                if !self.supervisor.is_current(plugin_id, generation) {
                    return;
                }
                let finished = self
                    .session
                    .as_mut()
                    .filter(|s| s.plugin_id == plugin_id)
                    .and_then(|s| s.finish(None));
                if let Some(finished) = finished {
                    self.surface_error(&Error::Protocol(reason));
                    self.request_done(finished);
                }
            }
            DaemonEvent::Output(response) => {
                if !self.supervisor.is_current(plugin_id, generation) {
                    debug!("[{}] Ignoring output from a replaced daemon", plugin_id);
                    return;
                }
                self.on_daemon_output(plugin_id, response);
            }
        }
    }

    fn on_daemon_output(&mut self, plugin_id: &str, response: PluginResponse) {
        if !response.is_actionable() {
            self.apply_side_output(plugin_id, response);
            return;
        }

        let is_active = self
            .session
            .as_ref()
            .is_some_and(|s| s.plugin_id == plugin_id);
        if !is_active {
            self.apply_detached_response(plugin_id, response, false);
            return;
        }

        // Patches are pushed unprompted and never answer a request
        let answers = !matches!(response, PluginResponse::Update { .. });
        let finished = if answers {
            self.session.as_mut().and_then(|s| s.finish(None))
        } else {
            None
        };
        self.apply_session_response(response);
        if let Some(finished) = finished {
            self.request_done(finished);
        }
    }

    fn on_daemon_down(&mut self, plugin_id: &str, generation: u64, reason: String) {
        let outcome = self.supervisor.on_exit(plugin_id, generation, &reason);
        self.after_daemon_outcome(plugin_id, outcome);
    }

    fn after_daemon_outcome(&mut self, plugin_id: &str, outcome: ExitOutcome) {
        let is_active = self
            .session
            .as_ref()
            .is_some_and(|s| s.plugin_id == plugin_id);
        if !is_active {
            return;
        }

        match outcome {
            ExitOutcome::Ignored => {}
            ExitOutcome::Restarting { .. } => {
                let finished = self.session.as_mut().and_then(|s| {
                    s.clear_queue();
                    s.navigator.on_non_view();
                    s.finish(None)
                });
                if finished.is_some_and(|f| f.busy) {
                    self.emit(CoreUpdate::Busy { busy: false });
                }
            }
            ExitOutcome::Dead => {
                let name = self
                    .plugins
                    .get(plugin_id)
                    .map_or_else(|| plugin_id.to_string(), |p| p.manifest.name.clone());
                self.close_plugin();
                self.emit(CoreUpdate::Error {
                    message: format!("{name} is unavailable"),
                });
            }
        }
    }

    pub(super) fn on_restart_due(&mut self, plugin_id: &str, generation: u64) {
        let Some(plugin) = self.plugins.get(plugin_id) else {
            debug!("[{}] Restart due for a removed plugin", plugin_id);
            return;
        };
        let outcome = self.supervisor.on_restart_due(plugin, generation);

        let ExitOutcome::Restarting { attempt } = outcome else {
            self.after_daemon_outcome(plugin_id, outcome);
            return;
        };
        let Some(session) = self.session.as_mut().filter(|s| s.plugin_id == plugin_id) else {
            return;
        };

        // The new process knows nothing of the old view stack
        info!(
            "[{}] Daemon back after restart {} (session {})",
            plugin_id,
            attempt,
            self.supervisor.session_token(plugin_id).unwrap_or("-")
        );
        session.clear_queue();
        session.navigator.reset();
        self.emit(CoreUpdate::NavigationDepthChanged { depth: 0 });
        self.send_request(QueuedRequest::new(PluginInput::initial(), None));
    }

    pub(super) fn on_query_changed_in_session(&mut self, query: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.query.clone_from(&query);
        if session.input_mode == InputMode::Realtime {
            self.send_request(QueuedRequest::new(PluginInput::search(query), None));
        }
    }

    pub(super) fn on_query_submitted(&mut self, query: String, context: Option<String>) {
        let Some(session) = self.session.as_mut() else {
            debug!("Query submitted with no active plugin");
            return;
        };
        if context.is_some() {
            session.context = context;
        }
        session.query.clone_from(&query);
        self.send_request(QueuedRequest::new(PluginInput::search(query), None));
    }

    /// Select a row of the active plugin's view
    pub(super) fn select_in_session(&mut self, item_id: &str, action: Option<String>) {
        let pending = pending_for_selection(item_id, action.as_deref());
        if !is_reserved_id(item_id) {
            self.record_session_item(item_id);
        }
        if let Some(session) = self.session.as_mut() {
            session.last_selected = Some(item_id.to_string());
        }
        self.send_request(QueuedRequest::new(
            PluginInput::action(item_id, action),
            pending,
        ));
    }

    fn record_session_item(&mut self, item_id: &str) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(plugin) = self.plugins.get(&session.plugin_id) else {
            return;
        };
        let context = ExecutionContext::new(None, now_millis());
        let max_terms = self.config.history.max_search_terms;
        if self
            .index
            .record_execution(plugin, Some(item_id), &context, max_terms)
        {
            self.schedule_flush();
        }
    }

    pub(super) fn on_back(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.navigator.depth() == 0 {
            self.close_plugin();
            return;
        }
        self.send_back();
    }

    fn send_back(&mut self) {
        self.send_request(QueuedRequest::new(
            PluginInput::action(BACK_ID, None),
            Some(PendingNav::Back),
        ));
    }

    pub(super) fn on_escape(&mut self) {
        let outcome = match self.session.as_mut() {
            Some(session) => session.navigator.on_escape(Instant::now()),
            None => {
                if self.is_open {
                    self.close_launcher();
                }
                return;
            }
        };
        match outcome {
            EscapeOutcome::Back => self.send_back(),
            EscapeOutcome::Close => self.close_plugin(),
        }
    }

    pub(super) fn on_slider_changed(&mut self, item_id: &str, value: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let seq = session.move_slider(item_id, value);
        let token = session.token.clone();
        let settle = self.config.navigation.slider_settle();
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = tx.send(CoreMessage::SliderSettled { token, seq });
        });
    }

    pub(super) fn on_slider_settled(&mut self, token: &str, seq: u64) {
        let Some(session) = self.session.as_mut().filter(|s| s.token == token) else {
            return;
        };
        let Some((item_id, value)) = session.settle_slider(seq) else {
            return;
        };
        self.record_session_item(&item_id);
        self.send_request(QueuedRequest::quiet(PluginInput::slider(item_id, value)));
    }

    pub(super) fn on_switch_toggled(&mut self, item_id: &str, value: bool) {
        if self.session.is_none() {
            return;
        }
        self.record_session_item(item_id);
        self.send_request(QueuedRequest::new(
            PluginInput::switch(item_id, value),
            None,
        ));
    }

    pub(super) fn on_form_submitted(
        &mut self,
        form_data: HashMap<String, String>,
        context: Option<String>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if context.is_some() {
            session.context = context;
        }
        self.send_request(QueuedRequest::new(PluginInput::form(form_data), None));
    }

    pub(super) fn on_form_field_changed(
        &mut self,
        field_id: String,
        value: String,
        form_data: HashMap<String, String>,
    ) {
        let input = PluginInput {
            field_id: Some(field_id),
            value: Some(serde_json::Value::String(value)),
            ..PluginInput::form(form_data)
        };
        self.send_request(QueuedRequest::quiet(input));
    }

    pub(super) fn on_plugin_action(&mut self, action_id: String) {
        self.send_request(QueuedRequest::new(
            PluginInput::action(PLUGIN_ENTRY_ID, Some(action_id)),
            None,
        ));
    }

    pub(super) fn request_index(&mut self, plugin_id: &str, mode: Option<IndexMode>) -> Result<()> {
        let plugin = self
            .plugins
            .get(plugin_id)
            .ok_or_else(|| Error::PluginNotFound(plugin_id.to_string()))?;
        if plugin.command.is_none() {
            return Err(Error::Plugin(format!("{plugin_id} has no handler")));
        }

        let indexed_ids = self.index.item_ids(plugin_id);
        let mode = mode.unwrap_or(if indexed_ids.is_empty() {
            IndexMode::Full
        } else {
            IndexMode::Incremental
        });
        let input = PluginInput::index(mode, indexed_ids);
        let state = self.supervisor.state(plugin_id);

        if plugin.is_daemon() && state.is_live() {
            let token = self.supervisor.session_token(plugin_id).unwrap_or_default();
            self.supervisor
                .send(plugin_id, &input.with_session(token))?;
        } else if state == DaemonState::Dead {
            return Err(Error::DaemonUnavailable(plugin_id.to_string()));
        } else if plugin.manifest.handler_type() == HandlerType::Stdio {
            let token = Uuid::new_v4().to_string();
            self.spawn_oneshot(plugin, input.with_session(&token), RequestTag::Index);
        } else {
            return Err(Error::DaemonUnavailable(plugin_id.to_string()));
        }

        info!("[{}] Requested {:?} index", plugin_id, mode);
        Ok(())
    }
}

//! Control-socket method handlers.
//!
//! Requests get a response; the same methods sent as notifications run
//! without one. Front ends subscribe for `core_update` notifications and feed
//! their input back through `event`.

use lumen_core::plugin::IndexMode;
use lumen_core::{CoreEvent, CoreUpdate, Error as CoreError};
use lumen_rpc::control::{
    self, DaemonStatus, OpenPluginParams, ReindexParams, ReloadSummary, UpdateStatusParams,
};
use lumen_rpc::protocol::{Message, Notification, Request, RequestId, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};
use crate::server::{ClientId, DaemonState};

/// Run a request and build its response. Handler errors become JSON-RPC
/// error objects.
pub fn handle_request(
    state: &mut DaemonState,
    client: &ClientId,
    sender: &mpsc::UnboundedSender<Message>,
    request: &Request,
) -> Response {
    let id = request.id.clone().unwrap_or(RequestId::Number(0));
    debug!("Request {} from {}", request.method, client);

    let result = if request.method == control::SUBSCRIBE {
        state.subscribe(client, sender.clone());
        Ok(json!({"subscribed": true}))
    } else {
        dispatch(state, &request.method, request.params.as_ref())
    };

    match result {
        Ok(value) => Response::success(id, value),
        Err(e) => {
            debug!("{} failed: {}", request.method, e);
            Response::error(id, e.into())
        }
    }
}

/// Run a method sent without an id. Errors are only logged.
pub fn handle_notification(state: &mut DaemonState, notification: &Notification) {
    if notification.method == control::SHUTDOWN {
        state.request_shutdown();
        return;
    }
    if let Err(e) = dispatch(state, &notification.method, notification.params.as_ref()) {
        warn!("Notification {} failed: {}", notification.method, e);
    }
}

fn dispatch(state: &mut DaemonState, method: &str, params: Option<&Value>) -> Result<Value> {
    match method {
        control::SHOW => handle_show(state),
        control::TOGGLE => handle_toggle(state),
        control::OPEN_PLUGIN => handle_open_plugin(state, parse_params(params)?),
        control::UPDATE_STATUS => handle_update_status(state, parse_params(params)?),
        control::REINDEX => handle_reindex(state, parse_params(params)?),
        control::STATUS => Ok(handle_status(state)),
        control::RELOAD_PLUGINS => handle_reload_plugins(state),
        control::EVENT => handle_event(state, parse_params(params)?),
        // The connection loop stops the server after this response is sent
        control::SHUTDOWN => Ok(json!({"status": "shutting_down"})),
        method => Err(DaemonError::MethodNotFound(method.to_string())),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T> {
    let params = params.ok_or_else(|| DaemonError::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params.clone()).map_err(|e| DaemonError::InvalidParams(e.to_string()))
}

// Handler dispatch requires a consistent Result<Value> signature
#[allow(clippy::unnecessary_wraps)]
fn handle_show(state: &mut DaemonState) -> Result<Value> {
    if !state.core.snapshot().is_open {
        state.core.process(CoreEvent::LauncherOpened);
    }
    Ok(json!({"status": "ok"}))
}

/// Hide when shown, show when hidden
// Handler dispatch requires a consistent Result<Value> signature
#[allow(clippy::unnecessary_wraps)]
fn handle_toggle(state: &mut DaemonState) -> Result<Value> {
    let visible = if state.core.snapshot().is_open {
        state.core.process(CoreEvent::LauncherClosed);
        state.broadcast(&CoreUpdate::Close);
        false
    } else {
        state.core.process(CoreEvent::LauncherOpened);
        true
    };
    Ok(json!({"visible": visible}))
}

fn handle_open_plugin(state: &mut DaemonState, params: OpenPluginParams) -> Result<Value> {
    let plugin_id = params.plugin_id;
    if state.core.plugins().get(&plugin_id).is_none() {
        return Err(CoreError::PluginNotFound(plugin_id).into());
    }

    if !state.core.snapshot().is_open {
        state.core.process(CoreEvent::LauncherOpened);
    }
    info!("[{}] Opened from control socket", plugin_id);
    state.core.process(CoreEvent::OpenPlugin { plugin_id });
    Ok(json!({"status": "ok"}))
}

fn handle_update_status(state: &mut DaemonState, params: UpdateStatusParams) -> Result<Value> {
    debug!(
        "[{}] Status push: {} badges, {} chips, ambient {:?}",
        params.plugin_id,
        params.status.badges.len(),
        params.status.chips.len(),
        params.status.ambient.as_ref().map(Vec::len)
    );
    state.core.update_status(&params.plugin_id, params.status)?;
    Ok(json!({"status": "ok"}))
}

fn handle_reindex(state: &mut DaemonState, params: ReindexParams) -> Result<Value> {
    let mode = params
        .mode
        .map(|m| {
            serde_json::from_value::<IndexMode>(Value::String(m.clone())).map_err(|_| {
                DaemonError::InvalidParams(format!("mode must be full or incremental, got {m}"))
            })
        })
        .transpose()?;
    state.core.reindex(&params.plugin_id, mode)?;
    Ok(json!({"status": "ok"}))
}

fn handle_status(state: &DaemonState) -> Value {
    let snapshot = state.core.snapshot();
    let status = DaemonStatus {
        plugin_count: snapshot.plugin_count,
        indexed_items: snapshot.index.item_count,
        is_open: snapshot.is_open,
        history_entries: snapshot.history_entries,
        active_plugin: snapshot.active_plugin,
        running_daemons: snapshot.running_daemons,
        unavailable_plugins: snapshot.unavailable_plugins,
    };
    json!(status)
}

fn handle_reload_plugins(state: &mut DaemonState) -> Result<Value> {
    let diff = state.core.reload_plugins()?;
    let summary = ReloadSummary {
        added: diff.added,
        removed: diff.removed,
        updated: diff.updated,
    };
    Ok(serde_json::to_value(summary)?)
}

// Handler dispatch requires a consistent Result<Value> signature
#[allow(clippy::unnecessary_wraps)]
fn handle_event(state: &mut DaemonState, event: CoreEvent) -> Result<Value> {
    state.core.process(event);
    Ok(json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{CoreChannels, LumenCore};
    use lumen_core::config::{Config, Directories};
    use lumen_rpc::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND, PLUGIN_NOT_FOUND};
    use tempfile::TempDir;
    use tokio::sync::watch;

    struct Fixture {
        state: DaemonState,
        shutdown: watch::Receiver<bool>,
        _channels: CoreChannels,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let dirs = Directories::with_base(dir.path().to_path_buf());
        let (core, channels) = LumenCore::new(dirs, Config::default()).unwrap();
        let (tx, rx) = watch::channel(false);
        Fixture {
            state: DaemonState::new(core, tx),
            shutdown: rx,
            _channels: channels,
            _dir: dir,
        }
    }

    fn request(method: &str, params: Option<Value>) -> Request {
        Request::new(method, params, RequestId::Number(7))
    }

    fn call(state: &mut DaemonState, method: &str, params: Option<Value>) -> Response {
        let (tx, _rx) = mpsc::unbounded_channel();
        handle_request(state, &ClientId::new(), &tx, &request(method, params))
    }

    #[tokio::test]
    async fn test_status_of_empty_core() {
        let mut f = fixture();
        let response = call(&mut f.state, control::STATUS, None);
        assert_eq!(response.id, RequestId::Number(7));

        let status: DaemonStatus = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(status.plugin_count, 0);
        assert!(!status.is_open);
        assert_eq!(status.history_entries, 0);
    }

    #[tokio::test]
    async fn test_subscribe_registers_client() {
        let mut f = fixture();
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ClientId::new();

        let response = handle_request(&mut f.state, &client, &tx, &request(control::SUBSCRIBE, None));
        assert!(response.error.is_none());
        assert_eq!(f.state.subscriber_count(), 1);
        assert!(f.state.remove_client(&client));
        assert_eq!(f.state.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_close_reaches_subscribers() {
        let mut f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.state.subscribe(&ClientId::new(), tx);

        let shown = call(&mut f.state, control::TOGGLE, None);
        assert_eq!(shown.result.unwrap()["visible"], true);
        assert!(f.state.core.snapshot().is_open);

        let hidden = call(&mut f.state, control::TOGGLE, None);
        assert_eq!(hidden.result.unwrap()["visible"], false);

        let Ok(Message::Notification(notification)) = rx.try_recv() else {
            panic!("Expected a core_update notification");
        };
        assert_eq!(notification.method, control::CORE_UPDATE);
        assert_eq!(notification.params.unwrap()["type"], "close");
    }

    #[tokio::test]
    async fn test_error_codes() {
        let mut f = fixture();

        let missing = call(&mut f.state, control::OPEN_PLUGIN, None);
        assert_eq!(missing.error.unwrap().code, INVALID_PARAMS);

        let unknown = call(
            &mut f.state,
            control::OPEN_PLUGIN,
            Some(json!({"pluginId": "ghost"})),
        );
        assert_eq!(unknown.error.unwrap().code, PLUGIN_NOT_FOUND);
        assert!(!f.state.core.snapshot().is_open);

        let status = call(
            &mut f.state,
            control::UPDATE_STATUS,
            Some(json!({"pluginId": "ghost", "status": {}})),
        );
        assert_eq!(status.error.unwrap().code, PLUGIN_NOT_FOUND);

        let method = call(&mut f.state, "launch_rockets", None);
        assert_eq!(method.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_notification_drives_core() {
        let mut f = fixture();
        let open = Notification::new(
            control::EVENT,
            Some(serde_json::to_value(CoreEvent::LauncherOpened).unwrap()),
        );
        handle_notification(&mut f.state, &open);
        assert!(f.state.core.snapshot().is_open);

        let close = Notification::new(
            control::EVENT,
            Some(serde_json::to_value(CoreEvent::LauncherClosed).unwrap()),
        );
        handle_notification(&mut f.state, &close);
        assert!(!f.state.core.snapshot().is_open);
    }

    #[tokio::test]
    async fn test_shutdown_notification_signals_server() {
        let mut f = fixture();
        assert!(!*f.shutdown.borrow());

        handle_notification(&mut f.state, &Notification::new(control::SHUTDOWN, None));
        assert!(*f.shutdown.borrow_and_update());
    }
}

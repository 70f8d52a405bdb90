use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_rpc::{Message, RpcClient};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{DaemonEvent, EventSink, log_stderr, spawn_handler, watch_exit};
use crate::plugin::{PluginInput, PluginResponse};
use crate::{Error, Result};

const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// Environment variable carrying the socket path the handler must listen on
pub const SOCKET_ENV: &str = "LUMEN_SOCKET";
pub const PLUGIN_ID_ENV: &str = "LUMEN_PLUGIN_ID";

/// Long-lived handler reached over JSON-RPC on a Unix socket.
///
/// Each step is sent as a request whose method is the step name and whose
/// params are the full request object. Notifications from the handler are
/// unsolicited responses (index and status pushes, live results).
pub(crate) struct SocketDaemon {
    plugin_id: String,
    request_tx: mpsc::UnboundedSender<PluginInput>,
    kill_tx: oneshot::Sender<()>,
}

impl SocketDaemon {
    /// Spawn the handler and connect to its socket in the background.
    ///
    /// # Errors
    ///
    /// Returns `Error::Process` if the process cannot be spawned.
    pub(crate) fn spawn(
        command: &[String],
        working_dir: &Path,
        sink: EventSink,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let socket_path = lumen_rpc::plugin_socket_path(sink.plugin_id());
        Self::spawn_at(command, working_dir, sink, connect_timeout, socket_path)
    }

    pub(crate) fn spawn_at(
        command: &[String],
        working_dir: &Path,
        sink: EventSink,
        connect_timeout: Duration,
        socket_path: PathBuf,
    ) -> Result<Self> {
        let plugin_id = sink.plugin_id().to_string();

        if socket_path.exists()
            && let Err(e) = std::fs::remove_file(&socket_path)
        {
            warn!("[{}] Failed to remove stale socket: {}", plugin_id, e);
        }

        let env = HashMap::from([
            (SOCKET_ENV, socket_path.to_string_lossy().into_owned()),
            (PLUGIN_ID_ENV, plugin_id.clone()),
        ]);
        let mut child = spawn_handler(&plugin_id, command, working_dir, &env)?;
        // Socket handlers do not use their pipes for the protocol
        drop(child.stdin.take());
        drop(child.stdout.take());
        if let Some(stderr) = child.stderr.take() {
            log_stderr(&plugin_id, stderr);
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(
            socket_path,
            connect_timeout,
            request_rx,
            sink.clone(),
        ));

        let kill_tx = watch_exit(child, sink);

        Ok(Self {
            plugin_id,
            request_tx,
            kill_tx,
        })
    }

    /// Requests queue until the connection is up
    pub(crate) fn send(&self, input: &PluginInput) -> Result<()> {
        debug!("[{}] Queueing {} request", self.plugin_id, input.step.as_str());
        self.request_tx
            .send(input.clone())
            .map_err(|_| Error::Transport(format!("[{}] socket closed", self.plugin_id)))
    }

    pub(crate) fn stop(self) {
        debug!("[{}] Stopping socket daemon", self.plugin_id);
        let _ = self.kill_tx.send(());
    }
}

async fn connect_with_retry(path: &Path, timeout: Duration) -> Option<RpcClient> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(client) = RpcClient::connect_to(path).await {
            return Some(client);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(CONNECT_RETRY).await;
    }
}

async fn run_connection(
    socket_path: PathBuf,
    connect_timeout: Duration,
    mut request_rx: mpsc::UnboundedReceiver<PluginInput>,
    sink: EventSink,
) {
    let Some(mut client) = connect_with_retry(&socket_path, connect_timeout).await else {
        sink.emit(DaemonEvent::ConnectFailed(format!(
            "no listener on {} after {:?}",
            socket_path.display(),
            connect_timeout
        )));
        return;
    };
    info!("[{}] Connected to {}", sink.plugin_id(), socket_path.display());
    sink.emit(DaemonEvent::Connected);

    loop {
        tokio::select! {
            input = request_rx.recv() => {
                // Handle dropped: the supervisor stopped this instance
                let Some(input) = input else { break };
                let params = match serde_json::to_value(&input) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("[{}] Failed to encode request: {}", sink.plugin_id(), e);
                        continue;
                    }
                };
                match client.request_value(input.step.as_str(), Some(params)).await {
                    Ok(result) => {
                        if !sink.emit(decode_reply(sink.plugin_id(), result)) {
                            break;
                        }
                    }
                    Err(lumen_rpc::Error::ConnectionClosed) => {
                        sink.emit(DaemonEvent::Disconnected);
                        break;
                    }
                    Err(lumen_rpc::Error::Rpc { message, .. }) => {
                        sink.emit(DaemonEvent::Output(PluginResponse::Error {
                            message,
                            details: None,
                        }));
                    }
                    Err(e) => {
                        warn!("[{}] Request failed: {}", sink.plugin_id(), e);
                        sink.emit(DaemonEvent::RequestFailed(e.to_string()));
                    }
                }
            }
            message = client.recv() => {
                let Some(message) = message else {
                    sink.emit(DaemonEvent::Disconnected);
                    break;
                };
                if let Some(event) = decode_push(sink.plugin_id(), message)
                    && !sink.emit(event)
                {
                    break;
                }
            }
        }
    }
}

fn decode_result(plugin_id: &str, result: Value) -> DaemonEvent {
    match PluginResponse::from_value(result) {
        Ok(response) => DaemonEvent::Output(response),
        Err(e) => {
            warn!("[{}] Dropping result: {}", plugin_id, e);
            DaemonEvent::BadOutput(e.to_string())
        }
    }
}

/// The result of a request is its answer, so an undecodable one fails it
fn decode_reply(plugin_id: &str, result: Value) -> DaemonEvent {
    match decode_result(plugin_id, result) {
        DaemonEvent::BadOutput(reason) => DaemonEvent::RequestFailed(reason),
        event => event,
    }
}

/// A notification is a response pushed without a request. Its method doubles
/// as the response type when the params object has none.
fn decode_push(plugin_id: &str, message: Message) -> Option<DaemonEvent> {
    let (method, params) = match message {
        Message::Notification(n) => (n.method, n.params),
        Message::Request(r) if r.id.is_none() => (r.method, r.params),
        _ => {
            warn!("[{}] Ignoring unexpected request from handler", plugin_id);
            return None;
        }
    };

    let mut params = params.unwrap_or(Value::Object(serde_json::Map::new()));
    if let Value::Object(map) = &mut params
        && !map.contains_key("type")
    {
        map.insert("type".to_string(), Value::String(method));
    }
    Some(decode_result(plugin_id, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_rpc::Notification;
    use serde_json::json;

    #[test]
    fn push_method_becomes_type() {
        let msg = Message::Notification(Notification::new(
            "status",
            Some(json!({"status": {"badges": [{"text": "2"}]}})),
        ));
        let Some(DaemonEvent::Output(PluginResponse::Status { status })) = decode_push("t", msg)
        else {
            panic!("Expected status push");
        };
        assert_eq!(status.badges[0].text.as_deref(), Some("2"));
    }

    #[test]
    fn decoded_notification_frame_is_a_push() {
        // Id-less frames come off the wire as requests
        let msg: Message =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "results", "params": {"results": []}}))
                .unwrap();
        assert!(matches!(
            decode_push("t", msg),
            Some(DaemonEvent::Output(PluginResponse::Results(_)))
        ));
    }

    #[test]
    fn push_keeps_explicit_type() {
        let msg = Message::Notification(Notification::new(
            "update",
            Some(json!({"type": "index", "items": []})),
        ));
        assert!(matches!(
            decode_push("t", msg),
            Some(DaemonEvent::Output(PluginResponse::Index { .. }))
        ));
    }

    #[test]
    fn unknown_push_is_bad_output() {
        let msg = Message::Notification(Notification::new("explode", None));
        assert!(matches!(
            decode_push("t", msg),
            Some(DaemonEvent::BadOutput(_))
        ));
    }

    #[test]
    fn undecodable_reply_fails_the_request() {
        assert!(matches!(
            decode_reply("t", json!({"type": "explode"})),
            DaemonEvent::RequestFailed(_)
        ));
        assert!(matches!(
            decode_reply("t", json!({"type": "results", "results": []})),
            DaemonEvent::Output(PluginResponse::Results(_))
        ));
    }
}

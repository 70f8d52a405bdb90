//! Process and socket plumbing between the core and plugin handlers.
//!
//! Nothing here touches core state. One-shot runs return their output as a
//! future; long-lived handlers report [`DaemonEvent`]s through the core's
//! message channel, tagged with the plugin id and the supervisor generation
//! that spawned them.

mod oneshot;
mod socket;
mod stream;

pub(crate) use oneshot::{OneShotOutput, parse_output, run_oneshot};
pub(crate) use socket::SocketDaemon;
pub(crate) use stream::StreamDaemon;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot as oneshot_channel};
use tracing::{debug, warn};

use crate::engine::CoreMessage;
use crate::plugin::{HandlerType, Plugin, PluginInput, PluginResponse};
use crate::{Error, Result};

/// Something a long-lived handler did
#[derive(Debug)]
pub enum DaemonEvent {
    Output(PluginResponse),
    /// A line or message that failed to decode; the handler keeps running
    BadOutput(String),
    /// A socket request that got no usable reply
    RequestFailed(String),
    /// Socket handler accepted the connection
    Connected,
    /// Socket handler never started listening
    ConnectFailed(String),
    /// Socket closed while the process may still be alive
    Disconnected,
    Exited {
        code: Option<i32>,
    },
}

/// Routes events from one handler instance back to the core
#[derive(Clone)]
pub(crate) struct EventSink {
    plugin_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<CoreMessage>,
}

impl EventSink {
    pub(crate) fn new(
        plugin_id: &str,
        generation: u64,
        tx: mpsc::UnboundedSender<CoreMessage>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            generation,
            tx,
        }
    }

    pub(crate) fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Returns false once the core has gone away
    pub(crate) fn emit(&self, event: DaemonEvent) -> bool {
        self.tx
            .send(CoreMessage::Daemon {
                plugin_id: self.plugin_id.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A running long-lived handler
pub(crate) enum DaemonHandle {
    Stream(StreamDaemon),
    Socket(SocketDaemon),
}

impl DaemonHandle {
    /// Spawn the handler process for a daemon plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin has no command or the process fails to spawn.
    pub(crate) fn spawn(
        plugin: &Plugin,
        sink: EventSink,
        socket_timeout: std::time::Duration,
    ) -> Result<Self> {
        let command = plugin
            .command
            .as_deref()
            .ok_or_else(|| Error::Plugin(format!("{} has no handler", plugin.id)))?;

        match plugin.manifest.handler_type() {
            HandlerType::Stdio => Ok(Self::Stream(StreamDaemon::spawn(
                command,
                &plugin.path,
                sink,
            )?)),
            HandlerType::Socket => Ok(Self::Socket(SocketDaemon::spawn(
                command,
                &plugin.path,
                sink,
                socket_timeout,
            )?)),
        }
    }

    /// Queue a request for the handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler's input channel is closed.
    pub(crate) fn send(&self, input: &PluginInput) -> Result<()> {
        match self {
            Self::Stream(d) => d.send(input),
            Self::Socket(d) => d.send(input),
        }
    }

    /// Kill the process. Its exit event still arrives but carries a stale generation.
    pub(crate) fn stop(self) {
        match self {
            Self::Stream(d) => d.stop(),
            Self::Socket(d) => d.stop(),
        }
    }
}

/// Spawn a handler with piped stdio that dies with its handle
pub(crate) fn spawn_handler(
    plugin_id: &str,
    command: &[String],
    working_dir: &Path,
    env: &HashMap<&str, String>,
) -> Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Process(format!("[{plugin_id}] empty handler command")))?;

    Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Process(format!("Failed to spawn {program}: {e}")))
}

/// Forward a handler's stderr to the log
pub(crate) fn log_stderr(plugin_id: &str, stderr: ChildStderr) {
    let plugin_id = plugin_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!("[{}] stderr: {}", plugin_id, line);
        }
    });
}

/// Wait for a daemon process to exit, or kill it when asked
pub(crate) fn watch_exit(mut child: Child, sink: EventSink) -> oneshot_channel::Sender<()> {
    let (kill_tx, kill_rx) = oneshot_channel::channel::<()>();
    tokio::spawn(async move {
        let code = tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = kill_rx => {
                if let Err(e) = child.kill().await {
                    debug!("[{}] kill failed: {}", sink.plugin_id(), e);
                }
                None
            }
        };
        debug!("[{}] handler exited (code {:?})", sink.plugin_id(), code);
        sink.emit(DaemonEvent::Exited { code });
    });
    kill_tx
}

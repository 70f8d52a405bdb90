use std::collections::HashMap;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::{DaemonEvent, EventSink, log_stderr, spawn_handler, watch_exit};
use crate::plugin::{PluginInput, PluginResponse};
use crate::{Error, Result};

/// Long-lived handler speaking line-delimited JSON over stdin/stdout
pub(crate) struct StreamDaemon {
    plugin_id: String,
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: oneshot::Sender<()>,
}

impl StreamDaemon {
    /// Spawn the process and start its reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns `Error::Process` if the process cannot be spawned.
    pub(crate) fn spawn(command: &[String], working_dir: &Path, sink: EventSink) -> Result<Self> {
        let plugin_id = sink.plugin_id().to_string();
        let mut child = spawn_handler(&plugin_id, command, working_dir, &HashMap::new())?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdout handle".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            log_stderr(&plugin_id, stderr);
        }

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let writer_id = plugin_id.clone();
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    error!("[{}] Failed to write to stdin: {}", writer_id, e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!("[{}] Failed to flush stdin: {}", writer_id, e);
                    break;
                }
            }
        });

        let reader_sink = sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = match PluginResponse::parse(line) {
                    Ok(response) => DaemonEvent::Output(response),
                    Err(e) => {
                        debug!("[{}] Unparseable line: {} - Raw: {}", reader_sink.plugin_id(), e, line);
                        DaemonEvent::BadOutput(e.to_string())
                    }
                };
                if !reader_sink.emit(event) {
                    break;
                }
            }
            debug!("[{}] stdout closed", reader_sink.plugin_id());
        });

        let kill_tx = watch_exit(child, sink);

        Ok(Self {
            plugin_id,
            stdin_tx,
            kill_tx,
        })
    }

    pub(crate) fn send(&self, input: &PluginInput) -> Result<()> {
        let json = serde_json::to_string(input)? + "\n";
        debug!("[{}] Sending: {}", self.plugin_id, json.trim());
        self.stdin_tx
            .send(json)
            .map_err(|_| Error::Transport(format!("[{}] stdin closed", self.plugin_id)))
    }

    pub(crate) fn stop(self) {
        debug!("[{}] Stopping daemon", self.plugin_id);
        let _ = self.kill_tx.send(());
    }
}

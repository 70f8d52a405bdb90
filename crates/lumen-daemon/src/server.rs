//! Control socket server.
//!
//! The daemon owns one [`LumenCore`] behind a lock. Three kinds of work
//! mutate it: requests from socket clients, completed background work from
//! the core's internal channel, and file-watcher reloads. Core updates are
//! broadcast to every subscribed client as `core_update` notifications.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lumen_core::config::Directories;
use lumen_core::{CoreChannels, CoreEvent, CoreUpdate, LumenCore};
use lumen_rpc::control::{CORE_UPDATE, SHUTDOWN};
use lumen_rpc::protocol::{Message, Notification};
use lumen_rpc::{JsonRpcCodec, control_socket_path};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::error::{DaemonError, Result};
use crate::handlers::{handle_notification, handle_request};
use crate::watcher::{WatchEvent, WatcherHandle, spawn_watchers};

/// Identifies one socket connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct DaemonState {
    pub core: LumenCore,
    subscribers: HashMap<ClientId, mpsc::UnboundedSender<Message>>,
    shutdown: watch::Sender<bool>,
}

impl DaemonState {
    #[must_use]
    pub fn new(core: LumenCore, shutdown: watch::Sender<bool>) -> Self {
        Self {
            core,
            subscribers: HashMap::new(),
            shutdown,
        }
    }

    pub fn subscribe(&mut self, client: &ClientId, sender: mpsc::UnboundedSender<Message>) {
        debug!("Client {} subscribed to updates", client);
        self.subscribers.insert(client.clone(), sender);
    }

    /// Forget a disconnected client. Returns whether it was subscribed.
    pub fn remove_client(&mut self, client: &ClientId) -> bool {
        self.subscribers.remove(client).is_some()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send an update to every subscriber
    pub fn broadcast(&self, update: &CoreUpdate) {
        if self.subscribers.is_empty() {
            return;
        }
        let params = match serde_json::to_value(update) {
            Ok(params) => params,
            Err(e) => {
                warn!("Failed to serialize update: {}", e);
                return;
            }
        };
        for (client, tx) in &self.subscribers {
            let message = Message::Notification(Notification::new(CORE_UPDATE, Some(params.clone())));
            if tx.send(message).is_err() {
                trace!("Subscriber {} is gone", client);
            }
        }
    }

    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }
}

/// Where the daemon listens and which directories its core uses
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub socket_path: PathBuf,
    pub dirs: Directories,
    /// Reload plugins and config when their files change
    pub watch: bool,
}

impl DaemonOptions {
    /// Standard per-user directories and the default socket unless one is given
    ///
    /// # Errors
    ///
    /// Returns an error if the user directories cannot be resolved.
    pub fn resolve(socket_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            socket_path: socket_path.unwrap_or_else(control_socket_path),
            dirs: Directories::new()?,
            watch: true,
        })
    }
}

/// Run the daemon until a `shutdown` request arrives.
///
/// # Errors
///
/// Returns an error if another daemon owns the socket, the socket cannot be
/// bound, or the core fails to initialize.
pub async fn run(options: DaemonOptions) -> Result<()> {
    let path = options.socket_path;
    cleanup_stale_socket(&path).await?;

    let (mut core, channels) = LumenCore::from_dirs(options.dirs)?;
    core.start();
    let watch_targets = {
        let dirs = core.dirs();
        (
            vec![dirs.builtin_plugins.clone(), dirs.user_plugins.clone()],
            dirs.config_file.clone(),
        )
    };

    let listener = UnixListener::bind(&path)?;
    info!("Daemon listening on {}", path.display());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = Arc::new(RwLock::new(DaemonState::new(core, shutdown_tx)));

    let pump = tokio::spawn(pump_core(state.clone(), channels));
    let _watchers = options.watch.then(|| {
        let (plugin_dirs, config_file) = watch_targets;
        start_watching(state.clone(), plugin_dirs, config_file)
    });

    info!("Ready to accept connections");
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    tokio::spawn(handle_connection(stream, state.clone()));
                }
                Err(e) => error!("Accept error: {}", e),
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    info!("Shutting down");
    state.write().await.core.shutdown();
    pump.abort();

    if path.exists()
        && let Err(e) = std::fs::remove_file(&path)
    {
        warn!("Failed to remove socket file {}: {}", path.display(), e);
    }
    Ok(())
}

/// Refuse to start over a live daemon, remove a stale socket file
async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if UnixStream::connect(path).await.is_ok() {
        return Err(DaemonError::AlreadyRunning(path.display().to_string()));
    }
    info!("Removing stale socket at {}", path.display());
    std::fs::remove_file(path)?;
    Ok(())
}

/// Feed completed background work into the core and fan its updates out
async fn pump_core(state: Arc<RwLock<DaemonState>>, channels: CoreChannels) {
    let CoreChannels {
        mut updates,
        mut internal,
    } = channels;
    loop {
        tokio::select! {
            Some(message) = internal.recv() => state.write().await.core.handle_message(message),
            Some(update) = updates.recv() => state.read().await.broadcast(&update),
            else => break,
        }
    }
    debug!("Core channels closed");
}

fn start_watching(
    state: Arc<RwLock<DaemonState>>,
    plugin_dirs: Vec<PathBuf>,
    config_file: PathBuf,
) -> WatcherHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = spawn_watchers(plugin_dirs, config_file, tx);

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mut state = state.write().await;
            match event {
                WatchEvent::PluginsChanged => match state.core.reload_plugins() {
                    Ok(diff) if !diff.is_empty() => info!(
                        "Plugin directories changed: +{:?} -{:?} ~{:?}",
                        diff.added, diff.removed, diff.updated
                    ),
                    Ok(_) => debug!("Plugin directories changed, plugin set unchanged"),
                    Err(e) => error!("Plugin reload failed: {}", e),
                },
                WatchEvent::ConfigChanged => {
                    if let Err(e) = state.core.reload_config() {
                        error!("Config reload failed: {}", e);
                    }
                }
            }
        }
        debug!("Watcher task ended");
    });

    handle
}

async fn handle_connection(stream: UnixStream, state: Arc<RwLock<DaemonState>>) {
    let (mut sink, mut stream) = Framed::new(stream, JsonRpcCodec::new()).split();
    let client = ClientId::new();
    debug!("New connection: {}", client);

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let send_client = client.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(message).await {
                warn!("Failed to send to {}: {}", send_client, e);
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("Read error from {}: {}", client, e);
                break;
            }
        };

        match message {
            Message::Request(request) if request.id.is_some() => {
                let shutdown = request.method == SHUTDOWN;
                let response = {
                    let mut state = state.write().await;
                    handle_request(&mut state, &client, &tx, &request)
                };
                if tx.send(Message::Response(response)).is_err() {
                    break;
                }
                if shutdown {
                    state.read().await.request_shutdown();
                }
            }
            Message::Request(request) => {
                let notification = Notification::new(request.method, request.params);
                handle_notification(&mut *state.write().await, &notification);
            }
            Message::Notification(notification) => {
                handle_notification(&mut *state.write().await, &notification);
            }
            Message::Response(response) => {
                trace!("Ignoring response {} from {}", response.id, client);
            }
        }
    }

    debug!("Connection closed: {}", client);
    let mut state = state.write().await;
    if state.remove_client(&client) && state.subscriber_count() == 0 && state.core.snapshot().is_open {
        debug!("Last front end disconnected, closing launcher");
        state.core.process(CoreEvent::LauncherClosed);
    }
    drop(state);
    send_task.abort();
}

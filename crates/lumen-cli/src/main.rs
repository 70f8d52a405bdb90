//! Lumen launcher CLI
//!
//! Control surface for `lumen-daemon`: keybindings call `lumen toggle` or
//! `lumen plugin <id>`, scripts push badges with `lumen update-status`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use lumen_core::config::Directories;
use lumen_core::plugin::PluginManager;
use lumen_rpc::control::{self, DaemonStatus, ReloadSummary};
use lumen_rpc::{RpcClient, control_socket_path};
use serde_json::{Value, json};
use tokio::time::sleep;

const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Find a binary, preferring one next to this executable (dev builds)
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Lumen launcher CLI
#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Lumen launcher - plugin-driven application launcher")]
#[command(version)]
#[command(after_help = "\
Examples:
  lumen                          Start the daemon if needed and toggle the launcher
  lumen daemon                   Run the daemon in the foreground (for systemd)
  lumen toggle                   Toggle launcher visibility
  lumen plugin clipboard         Open the clipboard plugin
  lumen update-status mail '{\"badges\": [{\"text\": \"3\"}]}'
  lumen reindex apps --mode full Rebuild the apps index
  lumen plugins list             List installed plugins
  lumen status                   Check daemon status

Keybinding examples (Hyprland):
  exec-once = lumen daemon
  bind = SUPER, Space, exec, lumen toggle
  bind = SUPER, V, exec, lumen plugin clipboard
")]
struct Cli {
    /// Control socket (defaults to `$XDG_RUNTIME_DIR/lumen.sock`)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in foreground (for systemd or manual use)
    Daemon,

    /// Toggle launcher visibility
    Toggle,

    /// Show the launcher
    Show,

    /// Open a specific plugin
    Plugin {
        /// Plugin ID to open
        id: String,
    },

    /// Update a plugin's status (badges, chips, ambient items)
    #[command(name = "update-status")]
    UpdateStatus {
        /// Plugin ID to update
        plugin_id: String,
        /// Status JSON (e.g. '{"badges": [{"text": "5"}]}')
        status_json: String,
    },

    /// Ask a plugin to refresh its index
    Reindex {
        /// Plugin ID to reindex
        plugin_id: String,
        /// Defaults to incremental when the plugin already has indexed items
        #[arg(long, value_enum)]
        mode: Option<ReindexMode>,
    },

    /// Plugin management commands
    Plugins {
        #[command(subcommand)]
        command: PluginsCommand,
    },

    /// Show daemon status
    Status,

    /// Rescan plugin directories
    #[command(name = "reload-plugins")]
    ReloadPlugins,

    /// Shutdown the daemon
    Shutdown,

    /// Restart the daemon
    Restart,
}

#[derive(Subcommand)]
enum PluginsCommand {
    /// List installed plugins
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReindexMode {
    Full,
    Incremental,
}

impl ReindexMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(control_socket_path);

    match cli.command {
        None => {
            ensure_daemon_running(&socket).await?;
            run_toggle(&socket).await
        }
        Some(Commands::Daemon) => run_daemon(&socket),
        Some(Commands::Toggle) => run_toggle(&socket).await,
        Some(Commands::Show) => run_show(&socket).await,
        Some(Commands::Plugin { id }) => run_plugin(&socket, id).await,
        Some(Commands::UpdateStatus {
            plugin_id,
            status_json,
        }) => run_update_status(&socket, plugin_id, &status_json).await,
        Some(Commands::Reindex { plugin_id, mode }) => {
            run_reindex(&socket, plugin_id, mode).await
        }
        Some(Commands::Plugins {
            command: PluginsCommand::List,
        }) => run_plugins_list(),
        Some(Commands::Status) => run_status(&socket).await,
        Some(Commands::ReloadPlugins) => run_reload_plugins(&socket).await,
        Some(Commands::Shutdown) => run_shutdown(&socket).await,
        Some(Commands::Restart) => run_restart(&socket).await,
    }
}

/// Run the daemon binary in the foreground, bailing on failure
fn run_daemon(socket: &Path) -> Result<()> {
    let binary = find_binary("lumen-daemon");
    let status = Command::new(&binary)
        .arg("--socket-path")
        .arg(socket)
        .status()
        .with_context(|| format!("Failed to start {}. Is it installed?", binary.display()))?;
    if !status.success() {
        bail!("lumen-daemon exited with status: {status}");
    }
    Ok(())
}

fn start_daemon_background(socket: &Path) -> Result<()> {
    let binary = find_binary("lumen-daemon");
    Command::new(&binary)
        .arg("--socket-path")
        .arg(socket)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn {}. Is it installed?", binary.display()))?;
    Ok(())
}

async fn is_daemon_responsive(socket: &Path) -> bool {
    match RpcClient::connect_to(socket).await {
        Ok(client) => client
            .with_timeout(Duration::from_secs(1))
            .request_value(control::STATUS, None)
            .await
            .is_ok(),
        Err(_) => false,
    }
}

async fn wait_for_daemon(socket: &Path, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if is_daemon_responsive(socket).await {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn ensure_daemon_running(socket: &Path) -> Result<()> {
    if socket.exists() && is_daemon_responsive(socket).await {
        return Ok(());
    }

    eprintln!("Starting daemon...");
    start_daemon_background(socket)?;
    if !wait_for_daemon(socket, DAEMON_START_TIMEOUT).await {
        bail!("Daemon failed to start within 5 seconds");
    }
    eprintln!("Daemon started");
    Ok(())
}

async fn connect(socket: &Path) -> Result<RpcClient> {
    if !socket.exists() {
        bail!(
            "Daemon not running (socket not found at {}).\nStart with: lumen daemon",
            socket.display()
        );
    }
    let client = RpcClient::connect_to(socket)
        .await
        .context("Failed to connect to daemon. Is it running?")?;
    Ok(client.with_timeout(REQUEST_TIMEOUT))
}

async fn run_toggle(socket: &Path) -> Result<()> {
    let client = connect(socket).await?;
    let result: Value = client
        .request(control::TOGGLE, None)
        .await
        .context("Toggle command failed")?;

    let visible = result.get("visible").and_then(Value::as_bool);
    match visible {
        Some(true) => println!("Launcher shown"),
        Some(false) => println!("Launcher hidden"),
        None => eprintln!("Unexpected toggle response: {result}"),
    }
    Ok(())
}

async fn run_show(socket: &Path) -> Result<()> {
    let client = connect(socket).await?;
    let _: Value = client
        .request(control::SHOW, None)
        .await
        .context("Show command failed")?;

    println!("Launcher shown");
    Ok(())
}

async fn run_plugin(socket: &Path, id: String) -> Result<()> {
    let client = connect(socket).await?;
    let _: Value = client
        .request(control::OPEN_PLUGIN, Some(json!({ "pluginId": id })))
        .await
        .context("Open plugin command failed")?;

    println!("Plugin '{id}' opened");
    Ok(())
}

async fn run_update_status(socket: &Path, plugin_id: String, status_json: &str) -> Result<()> {
    let status: Value = serde_json::from_str(status_json).context("Invalid JSON for status")?;

    let client = connect(socket).await?;
    let _: Value = client
        .request(
            control::UPDATE_STATUS,
            Some(json!({
                "pluginId": plugin_id,
                "status": status
            })),
        )
        .await
        .context("Update status command failed")?;

    println!("Status updated for plugin '{plugin_id}'");
    Ok(())
}

async fn run_reindex(socket: &Path, plugin_id: String, mode: Option<ReindexMode>) -> Result<()> {
    let mut params = json!({ "pluginId": plugin_id });
    if let Some(mode) = mode {
        params["mode"] = json!(mode.as_str());
    }

    let client = connect(socket).await?;
    let _: Value = client
        .request(control::REINDEX, Some(params))
        .await
        .context("Reindex command failed")?;

    println!("Reindex requested for plugin '{plugin_id}'");
    Ok(())
}

async fn run_status(socket: &Path) -> Result<()> {
    if !socket.exists() {
        println!("Status: Not running");
        println!("Socket: {} (not found)", socket.display());
        return Ok(());
    }

    let client = match connect(socket).await {
        Ok(client) => client,
        Err(e) => {
            println!("Status: Error");
            println!(
                "Socket: {} (exists but connection failed)",
                socket.display()
            );
            println!("Error: {e:#}");
            return Ok(());
        }
    };

    let status: DaemonStatus = client
        .request(control::STATUS, None)
        .await
        .context("Status request failed")?;

    println!("Status: Running");
    println!("Socket: {}", socket.display());
    println!("Plugins loaded: {}", status.plugin_count);
    println!("Indexed items: {}", status.indexed_items);
    println!("History entries: {}", status.history_entries);
    println!("Launcher open: {}", if status.is_open { "yes" } else { "no" });
    if let Some(plugin) = status.active_plugin {
        println!("Active plugin: {plugin}");
    }
    if !status.running_daemons.is_empty() {
        println!("Running daemons: {}", status.running_daemons.join(", "));
    }
    if !status.unavailable_plugins.is_empty() {
        println!("Unavailable: {}", status.unavailable_plugins.join(", "));
    }
    Ok(())
}

async fn run_reload_plugins(socket: &Path) -> Result<()> {
    let client = connect(socket).await?;
    let summary: ReloadSummary = client
        .request(control::RELOAD_PLUGINS, None)
        .await
        .context("Reload plugins command failed")?;

    println!("Plugins reloaded");
    for (label, ids) in [
        ("Added", &summary.added),
        ("Removed", &summary.removed),
        ("Updated", &summary.updated),
    ] {
        if !ids.is_empty() {
            println!("  {label}: {}", ids.join(", "));
        }
    }
    Ok(())
}

async fn run_shutdown(socket: &Path) -> Result<()> {
    let client = connect(socket).await?;

    // Notification: the daemon exits without answering
    client
        .notify(control::SHUTDOWN, None)
        .await
        .context("Shutdown command failed")?;

    println!("Daemon shutting down");
    Ok(())
}

async fn run_restart(socket: &Path) -> Result<()> {
    if let Ok(client) = connect(socket).await {
        let _ = client.notify(control::SHUTDOWN, None).await;
        let start = std::time::Instant::now();
        while socket.exists() && start.elapsed() < DAEMON_START_TIMEOUT {
            sleep(Duration::from_millis(50)).await;
        }
    }

    start_daemon_background(socket)?;
    if !wait_for_daemon(socket, DAEMON_START_TIMEOUT).await {
        bail!("Daemon failed to restart within 5 seconds");
    }
    println!("Daemon restarted");
    Ok(())
}

/// Lists plugins from disk, so it works without a running daemon
fn run_plugins_list() -> Result<()> {
    let dirs = Directories::new().context("Failed to resolve lumen directories")?;
    let mut manager = PluginManager::new(&dirs);
    manager.discover().context("Failed to scan plugin directories")?;

    if manager.is_empty() {
        println!("No plugins found.");
        println!("User plugins live in {}", dirs.user_plugins.display());
        return Ok(());
    }

    println!("\nInstalled Plugins:\n");
    for plugin in manager.all() {
        let kind = if plugin.command.is_none() {
            "static"
        } else if plugin.is_background_daemon() {
            "daemon (background)"
        } else if plugin.is_daemon() {
            "daemon"
        } else {
            "stdio"
        };

        print!("  {:<16} {}", plugin.id, plugin.manifest.name);
        if let Some(prefix) = &plugin.manifest.prefix {
            print!(" [{prefix}]");
        }
        print!(" ({kind})");
        if plugin.manifest.is_indexed() {
            print!(" indexed");
        }
        if plugin.is_builtin {
            print!(" builtin");
        }
        println!();

        if let Some(desc) = plugin.manifest.description.as_deref().filter(|d| !d.is_empty()) {
            println!("                   {desc}");
        }
    }
    println!();
    Ok(())
}

//! Lumen daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lumen_daemon::{DaemonOptions, run};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Lumen daemon - hosts the launcher core behind a control socket
#[derive(Parser, Debug)]
#[command(name = "lumen-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Custom socket path (defaults to `$XDG_RUNTIME_DIR/lumen.sock` or `/tmp/lumen.sock`)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Do not reload plugins and config when their files change
    #[arg(long)]
    no_watch: bool,
}

/// Debug builds log at debug level to stderr and to a timestamped file in the
/// temp dir, linked from `lumen-daemon.log`. Release builds log info to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lumen={default_level}")));

    if !cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return;
    }

    let temp_dir = std::env::temp_dir();
    let log_filename = format!(
        "lumen-daemon-{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let log_path = temp_dir.join(&log_filename);

    let latest = temp_dir.join("lumen-daemon.log");
    let _ = std::fs::remove_file(&latest);
    let _ = std::os::unix::fs::symlink(&log_path, &latest);

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&temp_dir, &log_filename));
    // Lives for the whole process
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    eprintln!("Logging to: {} (and stderr)", log_path.display());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging();

    let mut options =
        DaemonOptions::resolve(args.socket_path).context("Failed to resolve lumen directories")?;
    options.watch = !args.no_watch;

    info!("Starting lumen daemon");
    run(options).await.context("Daemon failed")?;
    info!("Lumen daemon stopped");
    Ok(())
}

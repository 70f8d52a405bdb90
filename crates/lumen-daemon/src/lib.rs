//! Lumen launcher daemon.
//!
//! Hosts a [`lumen_core::LumenCore`] and exposes it on a Unix control socket.
//! Front ends subscribe to core updates and send their input as events; the
//! `lumen` CLI uses the same socket for one-off commands.

pub mod error;
pub mod handlers;
pub mod server;
pub mod watcher;

pub use error::{DaemonError, Result};
pub use server::{ClientId, DaemonOptions, DaemonState, run};

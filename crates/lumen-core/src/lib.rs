//! Plugin execution and ranking core for the Lumen launcher.
//!
//! [`LumenCore`] owns every piece of mutable state: the plugin set, the
//! active session, the daemon supervisor, the index store and the history
//! log. Background I/O (plugin processes, timers) never touches that state
//! directly; it reports back through [`CoreMessage`]s which the host feeds
//! to [`LumenCore::handle_message`].

pub mod config;
pub mod navigation;
pub mod plugin;

// Exposed for benchmarks - not part of stable API
#[doc(hidden)]
pub mod search;

pub(crate) mod frecency;
pub(crate) mod index;
pub(crate) mod session;
pub(crate) mod supervisor;
pub(crate) mod transport;
pub(crate) mod utils;

mod engine;
mod error;

#[cfg(test)]
mod tests;

pub use engine::{CoreChannels, CoreMessage, CoreSnapshot, LumenCore};
pub use error::{Error, Result};
pub use index::IndexStats;
pub use supervisor::DaemonState;

pub use lumen_types::*;

//! Error types for the lumen daemon.

use lumen_rpc::protocol::{METHOD_NOT_FOUND, RpcError};

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another daemon answers on the control socket
    #[error("Another daemon is already listening on {0}")]
    AlreadyRunning(String),

    #[error("Core error: {0}")]
    Core(#[from] lumen_core::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] lumen_rpc::CodecError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

impl From<DaemonError> for RpcError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::Core(lumen_core::Error::PluginNotFound(id)) => {
                RpcError::plugin_not_found(&id)
            }
            DaemonError::Core(lumen_core::Error::DaemonUnavailable(id)) => {
                RpcError::plugin_unavailable(&id)
            }
            DaemonError::InvalidParams(msg) => RpcError::invalid_params(msg),
            DaemonError::MethodNotFound(name) => RpcError::method_not_found(&name),
            other => RpcError::internal_error(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;

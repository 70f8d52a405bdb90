use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("No active plugin")]
    NoActivePlugin,

    #[error("Process error: {0}")]
    Process(String),

    /// Writing to or waiting on a handler process failed, or it produced nothing
    #[error("Transport error: {0}")]
    Transport(String),

    /// Handler output was missing, not JSON, or had an unknown `type`
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Plugin unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Invalid index payload: {0}")]
    InvalidIndex(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] lumen_rpc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

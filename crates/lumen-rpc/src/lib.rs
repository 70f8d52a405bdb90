//! JSON-RPC 2.0 messages, framing and client for Lumen sockets.
//!
//! Two kinds of peers speak this protocol:
//!
//! - the control socket served by `lumen-daemon`, used by `lumen` and other
//!   front ends ([`control`] holds the method names and parameter shapes)
//! - plugins whose manifest declares a `socket` handler; the core connects to
//!   the plugin's socket and sends each protocol step as a request

pub mod client;
pub mod control;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{RpcClient, control_socket_path, plugin_socket_path, runtime_dir};
pub use error::{Error, Result};
pub use protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, Message,
    Notification, PARSE_ERROR, PLUGIN_NOT_FOUND, PLUGIN_UNAVAILABLE, Request, RequestId, Response,
    RpcError,
};
pub use transport::{CodecError, JsonRpcCodec};

pub use lumen_types::{CoreEvent, CoreUpdate, PluginStatus};

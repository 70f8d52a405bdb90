//! Error type for RPC operations.

use crate::protocol::RpcError;
use crate::transport::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Response carried neither result nor error")]
    UnexpectedResponse,
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PLUGIN_NOT_FOUND;

    #[test]
    fn rpc_error_converts_with_code() {
        let err: Error = RpcError::plugin_not_found("emoji").into();
        match err {
            Error::Rpc { code, message } => {
                assert_eq!(code, PLUGIN_NOT_FOUND);
                assert!(message.contains("emoji"));
            }
            _ => panic!("Expected Rpc error"),
        }
    }

    #[test]
    fn display_strings() {
        assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
        assert_eq!(Error::Timeout.to_string(), "Request timeout");
        assert!(
            Error::Codec(CodecError::MessageTooLarge(20_000_000))
                .to_string()
                .contains("20000000")
        );
    }
}

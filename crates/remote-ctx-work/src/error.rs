//! Work-side error type.

use remote_ctx_transport::RpcError;

/// Work-side error.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("No host connected")]
    NoHostConnected,
    /// Error reported by the Host.
    #[error("{0}")]
    Remote(String),
    #[error("Host disconnected before replying")]
    Disconnected,
    #[error("Background worker has stopped")]
    GateClosed,
    #[error("Failed to start background runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("Failed to listen: {0}")]
    Listen(#[source] std::io::Error),
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("{0} has no plain JSON form")]
    NotPlain(&'static str),
    #[error("Malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to encode request")]
    Encode,
}

impl From<RpcError> for RemoteError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(message) => Self::Remote(message),
            RpcError::Disconnected => Self::Disconnected,
            RpcError::Wire(_) => Self::Encode,
            RpcError::Decode(e) => Self::Decode(e),
        }
    }
}

//! Client error type.

use relay_core::ProtocolError;
use std::path::PathBuf;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("Server certificate not found: {0:?}")]
    CertificateNotFound(PathBuf),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Failed to send {kind}: {source}")]
    Send {
        kind: &'static str,
        #[source]
        source: WsError,
    },

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Stream closed by relay")]
    StreamClosed,

    #[error("Failed to load client config {path:?}: {message}")]
    Config { path: PathBuf, message: String },
}

//! Client configuration.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay host name or IP
    #[serde(default = "default_host")]
    pub host: String,

    /// Relay port (default: 50051)
    #[serde(default = "default_port")]
    pub port: u16,

    /// PEM certificate to trust; when set the connection uses TLS
    #[serde(default)]
    pub server_cert: Option<PathBuf>,

    /// Delay between reconnection attempts in milliseconds (default: 3000)
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Bound on connection setup and request/response exchanges (default: 5000)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long `stop` and `disconnect` wait for the stream to wind down (default: 30000)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_reconnect_interval() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_cert: None,
            reconnect_interval_ms: default_reconnect_interval(),
            request_timeout_ms: default_request_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ClientError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ClientError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn with_server_cert(mut self, cert: impl Into<PathBuf>) -> Self {
        self.server_cert = Some(cert.into());
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// `host:port`, for log and error messages.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        let scheme = if self.server_cert.is_some() { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

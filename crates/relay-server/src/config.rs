//! Relay configuration.
//!
//! Loaded from an optional JSON file; command-line flags override individual
//! fields afterwards. Everything is validated before the relay binds.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid bind address {0:?}")]
    BindAddress(String),

    #[error("Send timeout must be greater than zero")]
    SendTimeout,

    #[error("TLS certificate not found: {0:?}")]
    MissingCertificate(PathBuf),

    #[error("TLS private key not found: {0:?}")]
    MissingPrivateKey(PathBuf),

    #[error("Invalid TLS material: {0}")]
    Tls(String),
}

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP port (default: 50051)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve over TLS when set; plaintext otherwise
    #[serde(default)]
    pub tls: Option<TlsFiles>,

    /// Upper bound on one write to a member before it is removed (default: 1000)
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_send_timeout_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            tls: None,
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServerConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout_ms = send_timeout.as_millis() as u64;
        self
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsFiles {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Socket address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|_| ConfigError::BindAddress(self.bind.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Check the bind address and that any TLS files exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::SendTimeout);
        }
        if let Some(tls) = &self.tls {
            if !tls.cert.is_file() {
                return Err(ConfigError::MissingCertificate(tls.cert.clone()));
            }
            if !tls.key.is_file() {
                return Err(ConfigError::MissingPrivateKey(tls.key.clone()));
            }
        }
        Ok(())
    }
}

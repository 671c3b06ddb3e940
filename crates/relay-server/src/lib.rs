//! relay-server library: membership registry, broadcast engine and the
//! WebSocket server that drives them.
//!
//! The binary in `main.rs` is a thin shell over these modules, which
//! integration tests use directly.

pub mod broadcast;
pub mod config;
pub mod membership;
pub mod registry;
pub mod server;
pub mod session;
pub mod tls;

// Re-export key types for convenience
pub use broadcast::{BroadcastEngine, RelayOutcome};
pub use config::{ConfigError, ServerConfig, TlsFiles};
pub use membership::{Departed, Membership, Recipient};
pub use registry::{Departure, Registry, Route, ViewChange};
pub use server::RelayServer;
pub use session::{Session, SessionError, SessionId};

//! relay-client: Member-side connection to a cluster relay.
//!
//! This crate provides:
//! - `ConnectionManager`: join/leave/send over one relay stream, with
//!   automatic reconnection after transport errors
//! - `ConnectionState`: compare-and-set connection status
//! - `Reconnector`: fixed-interval retry task
//! - `EventBus`: view and message subscriptions

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod reconnector;
pub mod state;
pub mod tls;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, EventBus, Subscription};
pub use manager::ConnectionManager;
pub use reconnector::{ReconnectFn, Reconnector};
pub use state::{ConnectionState, ConnectionStatus};

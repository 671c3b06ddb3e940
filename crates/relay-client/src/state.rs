//! Connection status of a member.
//!
//! The status only moves through guarded transitions: a caller states what it
//! expects the current status to be and the change is applied only if that
//! still holds.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Atomically updated [`ConnectionStatus`].
#[derive(Debug)]
pub struct ConnectionState {
    status: AtomicU8,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }
}

impl ConnectionState {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status: AtomicU8::new(status as u8),
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is(&self, status: ConnectionStatus) -> bool {
        self.get() == status
    }

    pub fn is_one_of(&self, statuses: &[ConnectionStatus]) -> bool {
        statuses.contains(&self.get())
    }

    /// Move to `next` only if the status is currently `expected`.
    pub fn compare_and_set(&self, expected: ConnectionStatus, next: ConnectionStatus) -> bool {
        self.status
            .compare_exchange(expected as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditional transition. Returns the previous status.
    pub fn set(&self, next: ConnectionStatus) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.swap(next as u8, Ordering::AcqRel))
    }
}

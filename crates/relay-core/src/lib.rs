//! relay-core: Wire contract shared by the cluster relay and its members.
//!
//! This crate provides:
//! - `Address`: member identity (128-bit UUID plus display metadata)
//! - `View`: ordered membership snapshot with a monotonically increasing id
//! - Message envelope, correlation and relay headers
//! - Request/response enums and their JSON framing

pub mod address;
pub mod protocol;
pub mod view;

pub use address::{Address, AddressError};
pub use protocol::{
    CorrelationHeader, DumpResponse, GetViewRequest, GetViewResponse, JoinRequest, LeaveRequest,
    MessageEnvelope, ProtocolError, RegisterViewRequest, RelayHeader, RelayHeaderType, Request,
    Response, MAX_MESSAGE_SIZE,
};
pub use view::View;

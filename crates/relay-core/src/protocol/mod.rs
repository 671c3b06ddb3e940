//! Wire protocol between relay members and the relay server.
//!
//! Every frame is a single JSON object sent as a binary WebSocket frame.
//! - Requests (member → relay) and responses (relay → member) are
//!   discriminated by their `type` field
//! - Application messages travel in a `MessageEnvelope` in both directions

pub mod encoding;
pub mod envelope;
pub mod request;
pub mod response;

pub use encoding::{ProtocolError, MAX_MESSAGE_SIZE};
pub use envelope::{CorrelationHeader, MessageEnvelope, RelayHeader, RelayHeaderType};
pub use request::{GetViewRequest, JoinRequest, LeaveRequest, RegisterViewRequest, Request};
pub use response::{DumpResponse, GetViewResponse, Response};

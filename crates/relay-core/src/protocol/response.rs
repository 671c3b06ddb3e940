//! Responses pushed by the relay to members.
//!
//! Responses arrive asynchronously on the same stream as the requests. Views
//! and relayed messages are unsolicited; acknowledgments, `getViewResponse`
//! and `dumpResponse` answer a request from the same member in order.

use super::encoding::{decode, encode, ProtocolError};
use super::envelope::MessageEnvelope;
use crate::View;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    View(View),
    Message(MessageEnvelope),
    RegisterViewAck,
    LeaveAck,
    GetViewResponse(GetViewResponse),
    DumpResponse(DumpResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetViewResponse {
    /// `None` when the cluster has no members
    #[serde(default)]
    pub view: Option<View>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpResponse {
    pub text: String,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::View(_) => "view",
            Self::Message(_) => "message",
            Self::RegisterViewAck => "registerViewAck",
            Self::LeaveAck => "leaveAck",
            Self::GetViewResponse(_) => "getViewResponse",
            Self::DumpResponse(_) => "dumpResponse",
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

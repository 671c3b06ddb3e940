//! Requests sent by members to the relay.

use super::encoding::{decode, encode, ProtocolError};
use super::envelope::MessageEnvelope;
use crate::{Address, View};
use serde::{Deserialize, Serialize};

/// A request frame.
///
/// Wire format: `{"type":"join","cluster":"rpcs","address":{...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Join `cluster`; triggers a view broadcast if the address is new
    Join(JoinRequest),
    /// Leave `cluster`; acknowledged with `leaveAck`
    Leave(LeaveRequest),
    /// Seed the cluster with an externally known view; acknowledged, no broadcast
    RegisterView(RegisterViewRequest),
    /// Fetch the current view of `cluster` for this member only
    GetView(GetViewRequest),
    /// Relay an application message
    Message(MessageEnvelope),
    /// Diagnostic listing of every cluster
    Dump,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub cluster: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub cluster: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterViewRequest {
    pub cluster: String,
    pub view: View,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetViewRequest {
    pub cluster: String,
}

impl Request {
    pub fn join(cluster: impl Into<String>, address: Address) -> Self {
        Self::Join(JoinRequest {
            cluster: cluster.into(),
            address,
        })
    }

    pub fn leave(cluster: impl Into<String>, address: Address) -> Self {
        Self::Leave(LeaveRequest {
            cluster: cluster.into(),
            address,
        })
    }

    pub fn register_view(cluster: impl Into<String>, view: View, address: Address) -> Self {
        Self::RegisterView(RegisterViewRequest {
            cluster: cluster.into(),
            view,
            address,
        })
    }

    pub fn get_view(cluster: impl Into<String>) -> Self {
        Self::GetView(GetViewRequest {
            cluster: cluster.into(),
        })
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::RegisterView(_) => "registerView",
            Self::GetView(_) => "getView",
            Self::Message(_) => "message",
            Self::Dump => "dump",
        }
    }

    /// Cluster the request is scoped to (`None` for dump).
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::Join(r) => Some(&r.cluster),
            Self::Leave(r) => Some(&r.cluster),
            Self::RegisterView(r) => Some(&r.cluster),
            Self::GetView(r) => Some(&r.cluster),
            Self::Message(m) => Some(&m.cluster),
            Self::Dump => None,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

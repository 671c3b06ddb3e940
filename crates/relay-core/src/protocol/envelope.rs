//! Message envelope and its optional headers.
//!
//! The relay treats the payload as opaque bytes. It only reads `cluster`,
//! `destination` and the correlation header's exclusion list; everything
//! else is forwarded verbatim.

use crate::Address;
use serde::{Deserialize, Serialize};

/// An application message routed through the relay.
///
/// `destination == None` means multicast to the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Address>,
    /// Opaque payload; serialized as a JSON number array
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_header: Option<CorrelationHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_header: Option<RelayHeader>,
}

impl MessageEnvelope {
    /// Create a message for every member of `cluster`.
    pub fn multicast(cluster: impl Into<String>, sender: Option<Address>, payload: Vec<u8>) -> Self {
        Self {
            cluster: cluster.into(),
            sender,
            destination: None,
            payload,
            correlation_header: None,
            relay_header: None,
        }
    }

    /// Create a message for a single member of `cluster`.
    pub fn unicast(
        cluster: impl Into<String>,
        sender: Option<Address>,
        destination: Address,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            destination: Some(destination),
            ..Self::multicast(cluster, sender, payload)
        }
    }

    pub fn with_correlation_header(mut self, header: CorrelationHeader) -> Self {
        self.correlation_header = Some(header);
        self
    }

    pub fn with_relay_header(mut self, header: RelayHeader) -> Self {
        self.relay_header = Some(header);
        self
    }

    pub fn is_multicast(&self) -> bool {
        self.destination.is_none()
    }

    /// Members to skip on multicast. Empty when there is no correlation header.
    pub fn exclusions(&self) -> &[Address] {
        self.correlation_header
            .as_ref()
            .map(|h| h.exclusion_list.as_slice())
            .unwrap_or(&[])
    }
}

/// Request/response correlation metadata used by RPC layers on top of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationHeader {
    #[serde(rename = "type")]
    pub kind: u8,
    pub request_id: u64,
    pub correlation_id: u16,
    /// Members that must not receive a multicast (ignored for unicast)
    #[serde(default)]
    pub exclusion_list: Vec<Address>,
}

impl CorrelationHeader {
    pub fn new(kind: u8, request_id: u64, correlation_id: u16) -> Self {
        Self {
            kind,
            request_id,
            correlation_id,
            exclusion_list: Vec::new(),
        }
    }

    pub fn excluding(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.exclusion_list.extend(addresses);
        self
    }
}

/// Kind of a cross-site relay header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayHeaderType {
    Data,
    SiteUnreachable,
    SitesUp,
    SitesDown,
    TopoReq,
    TopoRsp,
}

/// Marker for messages forwarded between sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHeader {
    #[serde(rename = "type")]
    pub kind: RelayHeaderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_destination: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_sender: Option<Address>,
    #[serde(default)]
    pub site_names: Vec<String>,
}

impl RelayHeader {
    pub fn new(kind: RelayHeaderType) -> Self {
        Self {
            kind,
            final_destination: None,
            original_sender: None,
            site_names: Vec::new(),
        }
    }
}

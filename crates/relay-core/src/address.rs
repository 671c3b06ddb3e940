//! Address: Identity of a cluster member.
//!
//! Wraps a 128-bit UUID split into two halves (matching the wire shape
//! `{uuidHigh, uuidLow}`) plus optional metadata. Only the identity takes
//! part in equality, ordering and hashing; name and site tags are carried
//! along for display and cross-site relaying.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid address: expected a UUID")]
    InvalidFormat(#[from] uuid::Error),
}

/// A member address as seen by the relay.
///
/// # Examples
/// ```
/// use relay_core::Address;
///
/// let a = Address::random().with_name("A");
/// let same = Address::from_parts(a.uuid_high, a.uuid_low);
/// assert_eq!(a, same); // names are metadata
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Most significant 64 bits of the identity
    pub uuid_high: u64,
    /// Least significant 64 bits of the identity
    pub uuid_low: u64,
    /// Logical display name (e.g. "A")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Site this member belongs to, for cross-site relaying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Whether this member coordinates its site
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_site_coordinator: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Address {
    /// Create an address from the two identity halves.
    pub fn from_parts(uuid_high: u64, uuid_low: u64) -> Self {
        Self {
            uuid_high,
            uuid_low,
            name: None,
            site: None,
            is_site_coordinator: false,
        }
    }

    /// Generate a new address with a random (v4) identity.
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an address from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        let (high, low) = uuid.as_u64_pair();
        Self::from_parts(high, low)
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a site tag.
    pub fn with_site(mut self, site: impl Into<String>, is_site_coordinator: bool) -> Self {
        self.site = Some(site.into());
        self.is_site_coordinator = is_site_coordinator;
        self
    }

    /// The identity as a UUID.
    pub fn uuid(&self) -> Uuid {
        Uuid::from_u64_pair(self.uuid_high, self.uuid_low)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.uuid_high == other.uuid_high && self.uuid_low == other.uuid_low
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid_high.hash(state);
        self.uuid_low.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.uuid_high, self.uuid_low).cmp(&(other.uuid_high, other.uuid_low))
    }
}

// Names are what operators recognise in logs and dumps; fall back to the UUID.
impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.uuid()),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

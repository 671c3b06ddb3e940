//! Membership views.
//!
//! A view is an immutable snapshot: the ordered member list, a view id that
//! only ever grows for a given cluster, and the coordinator, which is always
//! the first member.

use crate::Address;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Ordered membership snapshot of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub view_id: u64,
    pub coordinator: Address,
    pub members: Vec<Address>,
}

impl View {
    /// Build a view over `members`, using the first member as coordinator.
    ///
    /// Returns `None` for an empty member list: a view always has a coordinator.
    pub fn new(view_id: u64, members: Vec<Address>) -> Option<Self> {
        let coordinator = members.first()?.clone();
        Some(Self {
            view_id,
            coordinator,
            members,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}|{}] ({}) {}",
            self.coordinator,
            self.view_id,
            self.members.len(),
            print_addresses(&self.members)
        )
    }
}

/// Render addresses as `[A, B, C]`.
pub fn print_addresses<'a>(addresses: impl IntoIterator<Item = &'a Address>) -> String {
    let names: Vec<String> = addresses.into_iter().map(|a| a.to_string()).collect();
    format!("[{}]", names.join(", "))
}

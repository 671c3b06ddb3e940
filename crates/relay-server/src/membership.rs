//! Membership of a single cluster, and view generation over it.
//!
//! `Membership` is plain data: it is always accessed under the owning
//! cluster's lock in [`crate::registry`]. Members keep insertion order, so the
//! first member to join stays coordinator until it leaves.

use crate::session::{Session, SessionId};
use indexmap::IndexMap;
use relay_core::{Address, View};
use std::sync::Arc;

/// A member and the session it is reachable through.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub address: Address,
    pub session: Arc<Session>,
}

/// A member removed from a cluster.
#[derive(Debug, Clone)]
pub struct Departed {
    pub address: Address,
    /// `None` for placeholders registered through a bulk view
    pub session: Option<Arc<Session>>,
}

/// Member records of one cluster plus its view-id counter.
#[derive(Debug, Default)]
pub struct Membership {
    /// Address → session; `None` is a placeholder with no local channel yet
    members: IndexMap<Address, Option<Arc<Session>>>,
    /// Id of the most recently generated view (0 = none yet)
    last_view_id: u64,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue view numbering from a previous incarnation of the cluster.
    pub fn with_last_view_id(last_view_id: u64) -> Self {
        Self {
            members: IndexMap::new(),
            last_view_id,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains_key(address)
    }

    pub fn last_view_id(&self) -> u64 {
        self.last_view_id
    }

    /// Member addresses in view order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.members.keys()
    }

    /// Add `address` if absent. First writer wins: an existing record is left alone.
    pub fn join(&mut self, address: Address, session: Arc<Session>) -> bool {
        if self.members.contains_key(&address) {
            return false;
        }
        self.members.insert(address, Some(session));
        true
    }

    /// Seed from an externally known view, then bind `local` to `session`.
    ///
    /// Unknown bulk members become placeholders; `local` always ends up bound
    /// to `session`, replacing a placeholder or an older session.
    pub fn register_view(&mut self, bulk: &[Address], local: Address, session: Arc<Session>) {
        for address in bulk {
            if !self.members.contains_key(address) {
                self.members.insert(address.clone(), None);
            }
        }
        self.members.insert(local, Some(session));
    }

    /// Remove `address`, keeping the order of the remaining members.
    pub fn leave(&mut self, address: &Address) -> Option<Departed> {
        self.members
            .shift_remove_entry(address)
            .map(|(address, session)| Departed { address, session })
    }

    /// Remove every address bound to the session `id`.
    pub fn remove_session(&mut self, id: SessionId) -> Vec<Address> {
        let mut removed = Vec::new();
        self.members.retain(|address, session| {
            let bound = session.as_ref().is_some_and(|s| s.id() == id);
            if bound {
                removed.push(address.clone());
            }
            !bound
        });
        removed
    }

    /// The current view, without generating a new id.
    pub fn view(&self) -> Option<View> {
        View::new(self.last_view_id, self.members.keys().cloned().collect())
    }

    /// Generate the next view over the current members.
    ///
    /// Returns `None` (and leaves the counter alone) when the cluster is empty.
    pub fn compute_and_bump(&mut self) -> Option<View> {
        if self.members.is_empty() {
            return None;
        }
        self.last_view_id += 1;
        View::new(self.last_view_id, self.members.keys().cloned().collect())
    }

    /// Session bound to `address`; `None` for unknown members and placeholders.
    pub fn session_of(&self, address: &Address) -> Option<Arc<Session>> {
        self.members.get(address).cloned().flatten()
    }

    /// Point-in-time list of reachable members, minus `exclusions`.
    pub fn recipients(&self, exclusions: &[Address]) -> Vec<Recipient> {
        self.members
            .iter()
            .filter(|(address, _)| !exclusions.contains(address))
            .filter_map(|(address, session)| {
                session.as_ref().map(|s| Recipient {
                    address: address.clone(),
                    session: Arc::clone(s),
                })
            })
            .collect()
    }
}

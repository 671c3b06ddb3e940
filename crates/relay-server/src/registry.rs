//! Per-cluster membership registry.
//!
//! Clusters live in a concurrent map keyed by name; each cluster has its own
//! mutex, so unrelated clusters never contend. A cluster is created on the
//! first join/register and retired as soon as its last member leaves.
//!
//! The last view id of each retired cluster is kept in a bounded ledger, so a
//! recreated cluster keeps counting up. When the ledger is full the oldest
//! entry is evicted and its id raises a floor that every cluster without an
//! entry starts from; ids may skip ahead but never repeat.
//!
//! Every mutation that changes membership also generates the next view while
//! the cluster lock is held, and returns it together with a snapshot of the
//! recipients. Callers send after the lock is released.

use crate::membership::{Departed, Membership, Recipient};
use crate::session::{Session, SessionId};
use dashmap::DashMap;
use indexmap::IndexMap;
use relay_core::{view::print_addresses, Address, MessageEnvelope, View};
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// A freshly generated view and the members it must be pushed to.
#[derive(Debug, Clone)]
pub struct ViewChange {
    pub cluster: String,
    pub view: View,
    pub recipients: Vec<Recipient>,
}

/// Result of an explicit or implicit leave.
#[derive(Debug, Default)]
pub struct Departure {
    /// Members actually removed (empty if none were present)
    pub departed: Vec<Departed>,
    /// View for the remaining members, if any remain
    pub view_change: Option<ViewChange>,
}

impl Departure {
    pub fn removed(&self) -> bool {
        !self.departed.is_empty()
    }
}

/// Where a message envelope should go.
#[derive(Debug)]
pub enum Route {
    /// No registry exists for the envelope's cluster
    UnknownCluster,
    /// Unicast destination is not a reachable member
    UnknownDestination(Address),
    Unicast(Recipient),
    Multicast(Vec<Recipient>),
}

struct ClusterState {
    membership: Membership,
    /// Set once the cluster emptied and was removed from the table
    retired: bool,
}

struct Cluster {
    state: Mutex<ClusterState>,
}

impl Cluster {
    fn new(last_view_id: u64) -> Self {
        Self {
            state: Mutex::new(ClusterState {
                membership: Membership::with_last_view_id(last_view_id),
                retired: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Default number of retired clusters whose last view id is remembered.
pub const DEFAULT_RETIRED_CAPACITY: usize = 10_000;

/// Last view ids of retired clusters, oldest first.
struct RetiredLedger {
    ids: IndexMap<String, u64>,
    /// Highest id evicted from the ledger
    floor: u64,
    capacity: usize,
}

impl RetiredLedger {
    fn new(capacity: usize) -> Self {
        Self {
            ids: IndexMap::new(),
            floor: 0,
            capacity: capacity.max(1),
        }
    }

    /// Claim the starting view id for a cluster being (re)created.
    fn take(&mut self, name: &str) -> u64 {
        self.ids.shift_remove(name).unwrap_or(self.floor)
    }

    fn record(&mut self, name: &str, last_view_id: u64) {
        self.ids.shift_remove(name);
        self.ids.insert(name.to_string(), last_view_id);
        while self.ids.len() > self.capacity {
            if let Some((evicted, id)) = self.ids.shift_remove_index(0) {
                debug!("Forgetting retired cluster {} (last view id {})", evicted, id);
                self.floor = self.floor.max(id);
            }
        }
    }
}

/// All clusters known to one relay.
pub struct Registry {
    clusters: DashMap<String, Arc<Cluster>>,
    /// Never locked while acquiring another lock
    retired: Mutex<RetiredLedger>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_retired_capacity(DEFAULT_RETIRED_CAPACITY)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry remembering at most `capacity` retired clusters.
    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            clusters: DashMap::new(),
            retired: Mutex::new(RetiredLedger::new(capacity)),
        }
    }

    /// Number of retired clusters whose view id is remembered.
    pub fn retired_count(&self) -> usize {
        self.ledger().ids.len()
    }

    fn ledger(&self) -> MutexGuard<'_, RetiredLedger> {
        self.retired.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live clusters.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn contains_cluster(&self, cluster: &str) -> bool {
        self.clusters.contains_key(cluster)
    }

    /// Add `address` to `cluster` (creating it if needed).
    ///
    /// Returns the new view if the address was added, `None` for a duplicate join.
    pub fn join(&self, cluster: &str, address: Address, session: Arc<Session>) -> Option<ViewChange> {
        self.with_cluster(cluster, |membership| {
            if !membership.join(address.clone(), Arc::clone(&session)) {
                debug!("{} already a member of {}", address, cluster);
                return None;
            }
            info!("{} joined {} via {}", address, cluster, session.id());
            view_change(cluster, membership)
        })
    }

    /// Seed `cluster` with an external view and bind `local` to `session`.
    ///
    /// Never generates a view.
    pub fn register_view(&self, cluster: &str, bulk: &[Address], local: Address, session: Arc<Session>) {
        self.with_cluster(cluster, |membership| {
            info!(
                "{} registered view {} in {} via {}",
                local,
                print_addresses(bulk),
                cluster,
                session.id()
            );
            membership.register_view(bulk, local.clone(), Arc::clone(&session));
        })
    }

    /// Remove `address` from `cluster`.
    ///
    /// Unknown clusters and addresses are a no-op.
    pub fn leave(&self, cluster: &str, address: &Address) -> Departure {
        self.leave_all(cluster, std::slice::from_ref(address))
    }

    /// Remove several members at once, generating a single view for the survivors.
    pub fn leave_all(&self, cluster: &str, addresses: &[Address]) -> Departure {
        self.with_existing(cluster, |membership| {
            let departed: Vec<Departed> = addresses
                .iter()
                .filter_map(|address| membership.leave(address))
                .collect();
            if departed.is_empty() {
                return Departure::default();
            }
            info!(
                "{} left {}",
                print_addresses(departed.iter().map(|d| &d.address)),
                cluster
            );
            Departure {
                view_change: view_change(cluster, membership),
                departed,
            }
        })
        .unwrap_or_default()
    }

    /// Remove every address bound to `session`, in every cluster.
    ///
    /// Used when a session's stream ends without an explicit leave. Returns one
    /// view change per affected cluster that still has members.
    pub fn remove_session(&self, session: SessionId) -> Vec<ViewChange> {
        let mut changes = Vec::new();
        for (name, cluster) in self.snapshot_clusters() {
            let mut state = cluster.lock();
            if state.retired {
                continue;
            }
            let removed = state.membership.remove_session(session);
            if removed.is_empty() {
                continue;
            }
            info!(
                "{} removed {} from {}",
                session,
                print_addresses(&removed),
                name
            );
            if let Some(change) = view_change(&name, &mut state.membership) {
                changes.push(change);
            }
            self.retire_if_empty(&name, &cluster, &mut state);
        }
        changes
    }

    /// Current view of `cluster`, or `None` if it has no members.
    pub fn get_view(&self, cluster: &str) -> Option<View> {
        self.with_existing(cluster, |membership| membership.view())
            .flatten()
    }

    /// Resolve the recipients of `envelope` under the cluster lock.
    pub fn route(&self, envelope: &MessageEnvelope) -> Route {
        self.with_existing(&envelope.cluster, |membership| match &envelope.destination {
            Some(dest) => match membership.session_of(dest) {
                Some(session) => Route::Unicast(Recipient {
                    address: dest.clone(),
                    session,
                }),
                None => Route::UnknownDestination(dest.clone()),
            },
            None => Route::Multicast(membership.recipients(envelope.exclusions())),
        })
        .unwrap_or(Route::UnknownCluster)
    }

    /// Text listing of every cluster and its members.
    ///
    /// Each cluster is read under its own lock in turn; nothing is mutated.
    pub fn dump(&self) -> String {
        let mut clusters = self.snapshot_clusters();
        clusters.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::from("members:\n");
        for (name, cluster) in clusters {
            let state = cluster.lock();
            if state.retired {
                continue;
            }
            let _ = writeln!(
                out,
                "{}: {}",
                name,
                print_addresses(state.membership.addresses())
            );
        }
        out
    }

    /// Run `f` against `cluster`, creating the cluster if it does not exist.
    fn with_cluster<R>(&self, name: &str, mut f: impl FnMut(&mut Membership) -> R) -> R {
        loop {
            let cluster = self
                .clusters
                .entry(name.to_string())
                .or_insert_with(|| {
                    let last_view_id = self.ledger().take(name);
                    debug!("Creating cluster {} (last view id {})", name, last_view_id);
                    Arc::new(Cluster::new(last_view_id))
                })
                .clone();

            let mut state = cluster.lock();
            // Lost a race with the last member leaving; try again with a fresh cluster
            if state.retired {
                continue;
            }
            let result = f(&mut state.membership);
            self.retire_if_empty(name, &cluster, &mut state);
            return result;
        }
    }

    /// Run `f` against `cluster` if it exists.
    fn with_existing<R>(&self, name: &str, f: impl FnOnce(&mut Membership) -> R) -> Option<R> {
        let cluster = self.clusters.get(name)?.clone();
        let mut state = cluster.lock();
        if state.retired {
            return None;
        }
        let result = f(&mut state.membership);
        self.retire_if_empty(name, &cluster, &mut state);
        Some(result)
    }

    /// Must be called with the cluster lock held.
    fn retire_if_empty(&self, name: &str, cluster: &Arc<Cluster>, state: &mut ClusterState) {
        if !state.membership.is_empty() {
            return;
        }
        state.retired = true;
        // Record the counter before the cluster disappears from the table
        self.ledger().record(name, state.membership.last_view_id());
        self.clusters
            .remove_if(name, |_, current| Arc::ptr_eq(current, cluster));
        info!("Cluster {} is empty, removed", name);
    }

    fn snapshot_clusters(&self) -> Vec<(String, Arc<Cluster>)> {
        self.clusters
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

fn view_change(cluster: &str, membership: &mut Membership) -> Option<ViewChange> {
    let view = membership.compute_and_bump()?;
    Some(ViewChange {
        cluster: cluster.to_string(),
        view,
        recipients: membership.recipients(&[]),
    })
}

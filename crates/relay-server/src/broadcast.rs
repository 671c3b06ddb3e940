//! Message relay and view fan-out.
//!
//! Sends always happen outside the cluster lock, against a snapshot taken by
//! the registry. Each recipient is written independently: a recipient whose
//! write fails or exceeds its session's send timeout is removed from the cluster (an implicit leave) and the
//! survivors receive a corrective view. Nothing is reported back to the
//! sender, and nothing is retried.

use crate::membership::{Departed, Recipient};
use crate::registry::{Registry, Route, ViewChange};
use futures::future::join_all;
use relay_core::{Address, MessageEnvelope, Response};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Written to `delivered` members; `failed` members were removed
    Delivered { delivered: usize, failed: usize },
    /// The envelope's cluster has no registry
    UnknownCluster,
    /// The unicast destination is not a reachable member
    UnknownDestination,
}

/// Delivers envelopes and views to the sessions of a cluster.
pub struct BroadcastEngine {
    registry: Arc<Registry>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Relay `envelope` to its destination, or to every non-excluded member.
    pub async fn relay(&self, envelope: MessageEnvelope) -> RelayOutcome {
        let recipients = match self.registry.route(&envelope) {
            Route::UnknownCluster => {
                warn!("No members found for cluster {}; dropping message", envelope.cluster);
                return RelayOutcome::UnknownCluster;
            }
            Route::UnknownDestination(dest) => {
                warn!(
                    "Unicast destination {} ({}) not found in {}; dropping message",
                    dest,
                    dest.uuid(),
                    envelope.cluster
                );
                return RelayOutcome::UnknownDestination;
            }
            Route::Unicast(recipient) => vec![recipient],
            Route::Multicast(recipients) => recipients,
        };

        let cluster = envelope.cluster.clone();
        let frame = match Response::Message(envelope).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode message for {}: {}", cluster, e);
                return RelayOutcome::Delivered {
                    delivered: 0,
                    failed: 0,
                };
            }
        };

        debug!(
            "Relaying {} bytes to {} member(s) of {}",
            frame.len(),
            recipients.len(),
            cluster
        );
        let failed = deliver(&frame, &recipients).await;
        let outcome = RelayOutcome::Delivered {
            delivered: recipients.len() - failed.len(),
            failed: failed.len(),
        };
        if !failed.is_empty() {
            self.evict(&cluster, &failed).await;
        }
        outcome
    }

    /// Push a freshly generated view, repairing the cluster on failures.
    ///
    /// Members whose write fails are removed; the resulting view goes to the
    /// survivors, until a round completes without failures or nobody is left.
    pub async fn push_view(&self, change: ViewChange) {
        let mut next = Some(change);
        while let Some(change) = next.take() {
            let frame = match Response::View(change.view.clone()).to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to encode view for {}: {}", change.cluster, e);
                    return;
                }
            };
            info!("View {} for {}", change.view, change.cluster);

            let failed = deliver(&frame, &change.recipients).await;
            if failed.is_empty() {
                return;
            }
            let departure = self.registry.leave_all(&change.cluster, &failed);
            close_departed(&departure.departed).await;
            next = departure.view_change;
        }
    }

    /// Push each view change in turn.
    pub async fn push_views(&self, changes: Vec<ViewChange>) {
        for change in changes {
            self.push_view(change).await;
        }
    }

    /// Treat failed recipients as having left, and tell the survivors.
    async fn evict(&self, cluster: &str, failed: &[Address]) {
        let departure = self.registry.leave_all(cluster, failed);
        close_departed(&departure.departed).await;
        if let Some(change) = departure.view_change {
            self.push_view(change).await;
        }
    }
}

/// Write `frame` to every recipient concurrently.
///
/// Returns the addresses whose write failed.
pub async fn deliver(frame: &[u8], recipients: &[Recipient]) -> Vec<Address> {
    let sends = recipients.iter().map(|r| async move {
        match r.session.send_frame(frame).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Exception relaying to {} (removing member): {}", r.address, e);
                Some(r.address.clone())
            }
        }
    });
    join_all(sends).await.into_iter().flatten().collect()
}

/// Close the sessions of departed members.
pub async fn close_departed(departed: &[Departed]) {
    for member in departed {
        if let Some(session) = &member.session {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::{channel_session, drain, views};
    use futures::channel::mpsc::UnboundedReceiver;
    use relay_core::CorrelationHeader;
    use tokio_tungstenite::tungstenite::Message;

    fn addr(name: &str) -> Address {
        let low = name.bytes().fold(0u64, |acc, b| acc * 256 + b as u64);
        Address::from_parts(0, low).with_name(name)
    }

    fn messages(rx: &mut UnboundedReceiver<Message>) -> Vec<MessageEnvelope> {
        drain(rx)
            .into_iter()
            .filter_map(|r| match r {
                Response::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn setup() -> (Arc<Registry>, BroadcastEngine) {
        let registry = Arc::new(Registry::new());
        let engine = BroadcastEngine::new(Arc::clone(&registry));
        (registry, engine)
    }

    // ==================== multicast ====================

    #[tokio::test]
    async fn test_multicast_with_exclusions() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        let (sb, mut rb) = channel_session(2);
        let (sc, mut rc) = channel_session(3);
        registry.join("rpcs", addr("A"), sa);
        registry.join("rpcs", addr("B"), sb);
        registry.join("rpcs", addr("C"), sc);

        let header = CorrelationHeader::new(0, 1, 0).excluding([addr("A"), addr("B")]);
        let msg = MessageEnvelope::multicast("rpcs", Some(addr("A")), b"hello".to_vec())
            .with_correlation_header(header);

        let outcome = engine.relay(msg).await;
        assert_eq!(outcome, RelayOutcome::Delivered { delivered: 1, failed: 0 });

        assert!(messages(&mut ra).is_empty());
        assert!(messages(&mut rb).is_empty());
        let received = messages(&mut rc);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload, b"hello");
    }

    #[tokio::test]
    async fn test_multicast_failure_is_isolated() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        let (sb, rb) = channel_session(2);
        let (sc, mut rc) = channel_session(3);
        registry.join("rpcs", addr("A"), sa);
        registry.join("rpcs", addr("B"), sb);
        registry.join("rpcs", addr("C"), sc);
        drain(&mut ra);
        drain(&mut rc);
        drop(rb);

        let outcome = engine
            .relay(MessageEnvelope::multicast("rpcs", None, b"x".to_vec()))
            .await;
        assert_eq!(outcome, RelayOutcome::Delivered { delivered: 2, failed: 1 });

        // Survivors got the message and then a corrective view without B
        for rx in [&mut ra, &mut rc] {
            let responses = drain(rx);
            assert!(matches!(responses[0], Response::Message(_)));
            match &responses[1] {
                Response::View(v) => {
                    assert_eq!(v.view_id, 4);
                    assert!(!v.contains(&addr("B")));
                }
                other => panic!("Expected view, got {:?}", other),
            }
        }
        assert!(!registry.get_view("rpcs").unwrap().contains(&addr("B")));
    }

    // ==================== unicast ====================

    #[tokio::test]
    async fn test_unicast_to_member() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        let (sb, mut rb) = channel_session(2);
        registry.join("rpcs", addr("A"), sa);
        registry.join("rpcs", addr("B"), sb);

        let msg = MessageEnvelope::unicast("rpcs", Some(addr("A")), addr("B"), b"hi".to_vec());
        assert_eq!(
            engine.relay(msg).await,
            RelayOutcome::Delivered { delivered: 1, failed: 0 }
        );
        assert!(messages(&mut ra).is_empty());
        assert_eq!(messages(&mut rb).len(), 1);
    }

    #[tokio::test]
    async fn test_unicast_ignores_exclusion_list() {
        let (registry, engine) = setup();
        let (sb, mut rb) = channel_session(2);
        registry.join("rpcs", addr("B"), sb);

        let header = CorrelationHeader::new(0, 1, 0).excluding([addr("B")]);
        let msg = MessageEnvelope::unicast("rpcs", None, addr("B"), vec![])
            .with_correlation_header(header);
        engine.relay(msg).await;
        assert_eq!(messages(&mut rb).len(), 1);
    }

    #[tokio::test]
    async fn test_unicast_unknown_destination_leaves_registry_untouched() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        registry.join("rpcs", addr("A"), sa);
        drain(&mut ra);

        let msg = MessageEnvelope::unicast("rpcs", Some(addr("A")), addr("Z"), vec![]);
        assert_eq!(engine.relay(msg).await, RelayOutcome::UnknownDestination);

        assert!(drain(&mut ra).is_empty());
        assert_eq!(registry.get_view("rpcs").unwrap().view_id, 1);
    }

    #[tokio::test]
    async fn test_unicast_failure_removes_destination() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        let (sb, rb) = channel_session(2);
        registry.join("rpcs", addr("A"), sa);
        registry.join("rpcs", addr("B"), sb);
        drain(&mut ra);
        drop(rb);

        let msg = MessageEnvelope::unicast("rpcs", Some(addr("A")), addr("B"), vec![]);
        assert_eq!(
            engine.relay(msg).await,
            RelayOutcome::Delivered { delivered: 0, failed: 1 }
        );

        let received = views(&mut ra);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].view_id, 3);
        assert_eq!(received[0].members, vec![addr("A")]);
    }

    #[tokio::test]
    async fn test_unknown_cluster_dropped() {
        let (_registry, engine) = setup();
        let msg = MessageEnvelope::multicast("ghost", None, vec![]);
        assert_eq!(engine.relay(msg).await, RelayOutcome::UnknownCluster);
    }

    // ==================== views ====================

    #[tokio::test]
    async fn test_push_view_repairs_cluster() {
        let (registry, engine) = setup();
        let (sa, mut ra) = channel_session(1);
        let (sb, rb) = channel_session(2);
        registry.join("rpcs", addr("A"), sa);
        registry.join("rpcs", addr("B"), sb);
        drain(&mut ra);
        drop(rb);

        let (sc, mut rc) = channel_session(3);
        let change = registry.join("rpcs", addr("C"), sc).unwrap();
        engine.push_view(change).await;

        let a_views: Vec<u64> = views(&mut ra).iter().map(|v| v.view_id).collect();
        assert_eq!(a_views, vec![3, 4]);
        let c_views = views(&mut rc);
        assert_eq!(c_views.last().unwrap().members, vec![addr("A"), addr("C")]);
    }

    #[tokio::test]
    async fn test_push_view_all_failed_retires_cluster() {
        let (registry, engine) = setup();
        let (sa, ra) = channel_session(1);
        drop(ra);
        let change = registry.join("rpcs", addr("A"), sa).unwrap();

        engine.push_view(change).await;
        assert!(!registry.contains_cluster("rpcs"));
    }
}

//! Connection managers talking to a real relay-server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_client::{ClientConfig, ConnectionManager, ConnectionStatus, Subscription};
use relay_core::{Address, CorrelationHeader, MessageEnvelope, View};
use relay_server::{RelayServer, ServerConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay(server: RelayServer) -> SocketAddr {
    let listener = RelayServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(Arc::new(server).run(listener));
    local
}

struct Member {
    address: Address,
    manager: ConnectionManager,
    views: mpsc::UnboundedReceiver<View>,
    messages: mpsc::UnboundedReceiver<MessageEnvelope>,
    _subs: (Subscription, Subscription),
}

impl Member {
    fn new(name: &str, config: ClientConfig) -> Self {
        let manager = ConnectionManager::new(config).unwrap();
        let (view_tx, views) = mpsc::unbounded_channel();
        let (msg_tx, messages) = mpsc::unbounded_channel();
        let view_sub = manager.on_view(move |v| {
            let _ = view_tx.send(v.clone());
        });
        let msg_sub = manager.on_message(move |m| {
            let _ = msg_tx.send(m.clone());
        });
        Self {
            address: Address::random().with_name(name),
            manager,
            views,
            messages,
            _subs: (view_sub, msg_sub),
        }
    }

    async fn join(&mut self, cluster: &str) -> View {
        self.manager.connect(cluster, &self.address).await.unwrap();
        self.next_view().await
    }

    async fn next_view(&mut self) -> View {
        timeout(WAIT, self.views.recv())
            .await
            .expect("Timeout waiting for view")
            .unwrap()
    }

    async fn next_message(&mut self) -> MessageEnvelope {
        timeout(WAIT, self.messages.recv())
            .await
            .expect("Timeout waiting for message")
            .unwrap()
    }
}

fn config(relay: SocketAddr) -> ClientConfig {
    ClientConfig::new("127.0.0.1", relay.port())
}

#[tokio::test]
async fn test_members_see_views_and_messages() {
    let relay = start_relay(RelayServer::new()).await;
    let mut a = Member::new("A", config(relay));
    let mut b = Member::new("B", config(relay));

    assert_eq!(a.join("rpcs").await.view_id, 1);
    let v2 = b.join("rpcs").await;
    assert_eq!(v2.view_id, 2);
    assert_eq!(v2.coordinator, a.address);
    assert_eq!(a.next_view().await, v2);
    assert!(a.manager.is_connected() && b.manager.is_connected());

    let unicast =
        MessageEnvelope::unicast("rpcs", Some(b.address.clone()), a.address.clone(), b"to A".to_vec());
    b.manager.send(unicast.clone()).await.unwrap();
    assert_eq!(a.next_message().await, unicast);

    // B excludes itself from its own multicast
    let header = CorrelationHeader::new(0, 1, 0).excluding([b.address.clone()]);
    let multicast = MessageEnvelope::multicast("rpcs", Some(b.address.clone()), b"all".to_vec())
        .with_correlation_header(header);
    b.manager.send(multicast.clone()).await.unwrap();
    assert_eq!(a.next_message().await, multicast);

    let current = a.manager.get_view("rpcs").await.unwrap().unwrap();
    assert_eq!(current.view_id, 2);
    assert_eq!(a.manager.dump().await.unwrap(), "members:\nrpcs: [A, B]\n");

    b.manager.disconnect("rpcs", &b.address).await.unwrap();
    assert_eq!(b.manager.status(), ConnectionStatus::Disconnected);
    let v3 = a.next_view().await;
    assert_eq!(v3.view_id, 3);
    assert_eq!(v3.members, vec![a.address.clone()]);

    a.manager.stop().await;
}

#[tokio::test]
async fn test_register_view_then_join() {
    let relay = start_relay(RelayServer::new()).await;
    let mut a = Member::new("A", config(relay));
    let mut b = Member::new("B", config(relay));
    let mut c = Member::new("C", config(relay));

    // A and B bring an existing view over; registration alone pushes nothing
    let existing = View::new(5, vec![a.address.clone(), b.address.clone()]).unwrap();
    for member in [&a, &b] {
        member
            .manager
            .register_view("rpcs", &existing, &member.address)
            .await
            .unwrap();
    }
    for member in [&a, &b] {
        timeout(WAIT, async {
            while !member.manager.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registration was not acknowledged");
    }
    assert_eq!(a.manager.dump().await.unwrap(), "members:\nrpcs: [A, B]\n");

    let view = c.join("rpcs").await;
    assert_eq!(view.view_id, 1);
    assert_eq!(
        view.members,
        vec![a.address.clone(), b.address.clone(), c.address.clone()]
    );
    assert_eq!(a.next_view().await, view);
    assert_eq!(b.next_view().await, view);
}

#[tokio::test]
async fn test_tls_connection() {
    let dir = tempfile::tempdir().unwrap();
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, generated.cert.pem()).unwrap();
    std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

    let server = RelayServer::from_config(&ServerConfig::default().with_tls(&cert, &key)).unwrap();
    let relay = start_relay(server).await;

    let client_config = ClientConfig::new("localhost", relay.port()).with_server_cert(&cert);
    let mut a = Member::new("A", client_config);
    assert_eq!(a.join("secure").await.view_id, 1);
    assert_eq!(a.manager.dump().await.unwrap(), "members:\nsecure: [A]\n");
}

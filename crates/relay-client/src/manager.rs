//! Connection manager: one member's stream to the relay.
//!
//! Opening the stream sends a join (or a register-view) request; the stream
//! then carries views and relayed messages back. A transport error drops the
//! manager to `disconnected` and starts the reconnector, which keeps calling
//! the configured reconnection function until the next view arrives.
//!
//! Each opened stream gets a generation number. Events from the reader of a
//! superseded stream are ignored, so a late error from an old connection can
//! never tear down a newer one. Within a stream, a view whose id is not
//! above the last delivered one is dropped: concurrent membership changes on
//! the relay may reach this member out of order.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{ClientEvent, EventBus, Subscription};
use crate::reconnector::{ReconnectFn, Reconnector};
use crate::state::{ConnectionState, ConnectionStatus};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use relay_core::{Address, MessageEnvelope, Request, Response, View};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// An open stream: its serialized write half and the task reading it.
struct Stream {
    sink: Arc<Mutex<WsSink>>,
    reader: JoinHandle<()>,
}

/// State guarded by the manager lock.
struct Inner {
    stream: Option<Stream>,
    reconnector: Reconnector,
    /// Highest view id delivered on the current stream
    last_view_id: u64,
}

struct Shared {
    config: ClientConfig,
    tls: Option<Arc<rustls::ClientConfig>>,
    state: ConnectionState,
    /// Generation of the current stream; bumped under the manager lock
    generation: AtomicU64,
    inner: Mutex<Inner>,
    events: Arc<EventBus>,
}

/// Handle to a member's relay connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager for `config`. Nothing is opened until `connect`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let tls = match &config.server_cert {
            Some(cert) => Some(crate::tls::client_config(cert)?),
            None => None,
        };
        let reconnector = Reconnector::new(config.reconnect_interval());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                tls,
                state: ConnectionState::default(),
                generation: AtomicU64::new(0),
                inner: Mutex::new(Inner {
                    stream: None,
                    reconnector,
                    last_view_id: 0,
                }),
                events: Arc::new(EventBus::new()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is(ConnectionStatus::Connected)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    pub fn on_view(&self, handler: impl Fn(&View) + Send + Sync + 'static) -> Subscription {
        self.shared.events.on_view(handler)
    }

    pub fn on_message(
        &self,
        handler: impl Fn(&MessageEnvelope) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.events.on_message(handler)
    }

    pub async fn reconnector_running(&self) -> bool {
        self.shared.inner.lock().await.reconnector.is_running()
    }

    /// Set the function the reconnector runs after a transport error.
    pub async fn set_reconnect_fn(&self, function: ReconnectFn) {
        self.shared.inner.lock().await.reconnector.set_function(function);
    }

    /// Reconnect by joining `cluster` as `address` again.
    pub async fn rejoin_on_reconnect(&self, cluster: &str, address: &Address) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let cluster = cluster.to_string();
        let address = address.clone();
        let function: ReconnectFn = Arc::new(move || {
            let weak = weak.clone();
            let cluster = cluster.clone();
            let address = address.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let manager = ConnectionManager { shared };
                if let Err(e) = manager.connect(&cluster, &address).await {
                    debug!("Reconnect attempt failed: {}", e);
                }
            }
            .boxed()
        });
        self.set_reconnect_fn(function).await;
    }

    /// Open the stream and join `cluster`. No-op unless disconnected.
    pub async fn connect(&self, cluster: &str, address: &Address) -> Result<(), ClientError> {
        self.open_with(Request::join(cluster, address.clone())).await
    }

    /// Open the stream and seed `cluster` with an existing view.
    ///
    /// The relay acknowledges instead of broadcasting; the acknowledgment
    /// moves the manager to `connected`. No-op unless disconnected.
    pub async fn register_view(
        &self,
        cluster: &str,
        view: &View,
        address: &Address,
    ) -> Result<(), ClientError> {
        self.open_with(Request::register_view(cluster, view.clone(), address.clone()))
            .await
    }

    async fn open_with(&self, request: Request) -> Result<(), ClientError> {
        let shared = &self.shared;
        let frame = request.to_json()?;

        let mut inner = shared.inner.lock().await;
        if !shared
            .state
            .compare_and_set(ConnectionStatus::Disconnected, ConnectionStatus::Connecting)
        {
            debug!("Ignoring {}: already {}", request.kind(), shared.state.get());
            return Ok(());
        }

        let ws = match open(&shared.config, shared.tls.as_ref()).await {
            Ok(ws) => ws,
            Err(e) => {
                shared.on_transport_error(&mut inner, &e.to_string());
                return Err(e);
            }
        };

        let (write, read) = ws.split();
        let sink = Arc::new(Mutex::new(write));
        let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.shared), generation, read));
        inner.stream = Some(Stream {
            sink: Arc::clone(&sink),
            reader,
        });
        // A restarted relay numbers views from scratch
        inner.last_view_id = 0;

        let sent = sink.lock().await.send(Message::Binary(frame)).await;
        if let Err(source) = sent {
            shared.on_transport_error(&mut inner, &source.to_string());
            return Err(ClientError::Send {
                kind: request.kind(),
                source,
            });
        }
        info!("Sent {} to {}", request.kind(), shared.config.target());
        Ok(())
    }

    /// Leave `cluster` and close the stream. No-op without an open stream.
    pub async fn disconnect(&self, cluster: &str, address: &Address) -> Result<(), ClientError> {
        let Some(stream) = self.take_stream(false).await else {
            debug!("Disconnect ignored: no open stream");
            return Ok(());
        };

        let request = Request::leave(cluster, address.clone());
        let result = match request.to_json() {
            Ok(frame) => stream
                .sink
                .lock()
                .await
                .send(Message::Binary(frame))
                .await
                .map_err(|source| ClientError::Send {
                    kind: request.kind(),
                    source,
                }),
            Err(e) => Err(e.into()),
        };

        self.close_stream(stream).await;
        self.shared.state.set(ConnectionStatus::Disconnected);
        info!("Disconnected from {}", self.shared.config.target());
        result
    }

    /// Stop reconnecting and shut the stream down without leaving.
    ///
    /// Waits at most the configured shutdown timeout for the stream to end.
    pub async fn stop(&self) {
        if let Some(stream) = self.take_stream(true).await {
            self.close_stream(stream).await;
        }
        self.shared.state.set(ConnectionStatus::Disconnected);
    }

    /// Relay `envelope` through the open stream.
    ///
    /// Fails immediately with `NotConnected` unless connected; nothing is queued.
    pub async fn send(&self, envelope: MessageEnvelope) -> Result<(), ClientError> {
        self.send_request(&Request::Message(envelope)).await
    }

    pub async fn send_request(&self, request: &Request) -> Result<(), ClientError> {
        let shared = &self.shared;
        if !shared.state.is(ConnectionStatus::Connected) {
            return Err(ClientError::NotConnected(shared.config.target()));
        }
        let sink = {
            let inner = shared.inner.lock().await;
            inner.stream.as_ref().map(|s| Arc::clone(&s.sink))
        };
        let Some(sink) = sink else {
            return Err(ClientError::NotConnected(shared.config.target()));
        };

        let frame = request.to_json()?;
        let mut write = sink.lock().await;
        write
            .send(Message::Binary(frame))
            .await
            .map_err(|source| ClientError::Send {
                kind: request.kind(),
                source,
            })
    }

    /// Current view of `cluster`, or `None` if it has no members.
    ///
    /// Asked over a separate short-lived stream, so it works in any state.
    pub async fn get_view(&self, cluster: &str) -> Result<Option<View>, ClientError> {
        self.query(Request::get_view(cluster), "getViewResponse", |rsp| match rsp {
            Response::GetViewResponse(rsp) => Some(rsp.view),
            _ => None,
        })
        .await
    }

    /// Text listing of every cluster on the relay and its members.
    pub async fn dump(&self) -> Result<String, ClientError> {
        self.query(Request::Dump, "dumpResponse", |rsp| match rsp {
            Response::DumpResponse(rsp) => Some(rsp.text),
            _ => None,
        })
        .await
    }

    async fn query<T>(
        &self,
        request: Request,
        expected: &'static str,
        pick: impl Fn(Response) -> Option<T>,
    ) -> Result<T, ClientError> {
        let config = &self.shared.config;
        let frame = request.to_json()?;
        let mut ws = open(config, self.shared.tls.as_ref()).await?;
        ws.send(Message::Binary(frame))
            .await
            .map_err(|source| ClientError::Send {
                kind: request.kind(),
                source,
            })?;

        let exchange = async {
            while let Some(next) = ws.next().await {
                let data = match next {
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match Response::from_json(&data) {
                    Ok(response) => {
                        if let Some(value) = pick(response) {
                            return Ok(value);
                        }
                    }
                    Err(e) => return Err(ClientError::from(e)),
                }
            }
            Err(ClientError::StreamClosed)
        };
        let result = match timeout(config.request_timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(config.request_timeout(), expected)),
        };

        if let Err(e) = ws.close(None).await {
            debug!("Error closing query stream: {}", e);
        }
        result
    }

    /// Detach the current stream so its reader's events are ignored.
    async fn take_stream(&self, stop_reconnector: bool) -> Option<Stream> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if stop_reconnector {
            inner.reconnector.stop();
        }
        let stream = inner.stream.take()?;
        shared.state.set(ConnectionStatus::Disconnecting);
        shared.generation.fetch_add(1, Ordering::AcqRel);
        Some(stream)
    }

    /// Close the send side, then wait for the reader within the shutdown timeout.
    async fn close_stream(&self, stream: Stream) {
        if let Err(e) = stream.sink.lock().await.close().await {
            debug!("Error closing stream: {}", e);
        }
        let mut reader = stream.reader;
        let limit = self.shared.config.shutdown_timeout();
        if timeout(limit, &mut reader).await.is_err() {
            warn!(
                "Stream to {} did not shut down within {:?}; abandoning it",
                self.shared.config.target(),
                limit
            );
            reader.abort();
        }
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Drop the stream, fall back to `disconnected` and start reconnecting.
    fn on_transport_error(&self, inner: &mut Inner, reason: &str) {
        let previous = self.state.set(ConnectionStatus::Disconnected);
        if previous == ConnectionStatus::Connected {
            warn!("Connection to {} lost: {}", self.config.target(), reason);
        } else {
            debug!("Connection to {} failed: {}", self.config.target(), reason);
        }
        inner.stream = None;
        // Anything the old reader still reports is stale from here on
        self.generation.fetch_add(1, Ordering::AcqRel);
        if inner.reconnector.start() {
            info!(
                "Reconnecting to {} every {:?}",
                self.config.target(),
                inner.reconnector.interval()
            );
        }
    }

    /// Mark the stream established and stop reconnecting.
    ///
    /// With a `view_id`, also claims that view for delivery: returns false
    /// if a view with the same or a higher id was already delivered.
    async fn established(&self, generation: u64, view_id: Option<u64>) -> bool {
        let mut inner = self.inner.lock().await;
        if !self.is_current(generation) {
            return false;
        }
        if let Some(view_id) = view_id {
            if view_id <= inner.last_view_id {
                debug!(
                    "Dropping stale view {} (already at {})",
                    view_id, inner.last_view_id
                );
                return false;
            }
            inner.last_view_id = view_id;
        }
        if self
            .state
            .compare_and_set(ConnectionStatus::Connecting, ConnectionStatus::Connected)
        {
            info!("Connected to {}", self.config.target());
        }
        inner.reconnector.stop();
        true
    }

    async fn handle_frame(&self, generation: u64, data: &[u8]) {
        let response = match Response::from_json(data) {
            Ok(response) => response,
            Err(e) => {
                warn!("Ignoring malformed frame from {}: {}", self.config.target(), e);
                return;
            }
        };

        match response {
            Response::View(view) => {
                if self.established(generation, Some(view.view_id)).await {
                    debug!("Received view {}", view);
                    self.events.emit(&ClientEvent::View(view));
                }
            }
            Response::Message(envelope) => {
                if self.is_current(generation) {
                    self.events.emit(&ClientEvent::Message(envelope));
                }
            }
            Response::RegisterViewAck => {
                self.established(generation, None).await;
            }
            other => {
                debug!("Ignoring {} on member stream", other.kind());
            }
        }
    }

    async fn stream_ended(&self, generation: u64, reason: &str) {
        let mut inner = self.inner.lock().await;
        if !self.is_current(generation) {
            debug!("Superseded stream ended: {}", reason);
            return;
        }
        self.on_transport_error(&mut inner, reason);
    }
}

/// Read responses until the stream ends, then report the end.
async fn read_loop(shared: Weak<Shared>, generation: u64, mut read: SplitStream<WsStream>) {
    let reason = loop {
        let data = match read.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(frame))) => break format!("closed by relay ({:?})", frame),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        };
        let Some(strong) = shared.upgrade() else {
            return;
        };
        strong.handle_frame(generation, &data).await;
    };

    if let Some(strong) = shared.upgrade() {
        strong.stream_ended(generation, &reason).await;
    }
}

/// Dial the relay, bounded by the request timeout.
async fn open(
    config: &ClientConfig,
    tls: Option<&Arc<rustls::ClientConfig>>,
) -> Result<WsStream, ClientError> {
    let url = config.url();
    let connector = tls.map(|tls| Connector::Rustls(Arc::clone(tls)));
    let dial = connect_async_tls_with_config(url.as_str(), None, false, connector);
    match timeout(config.request_timeout(), dial).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(source)) => Err(ClientError::Connect { url, source }),
        Err(_) => Err(ClientError::Timeout(config.request_timeout(), "connection")),
    }
}

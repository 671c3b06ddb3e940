//! WebSocket relay server.
//!
//! Accepts TCP connections, optionally wraps them in TLS, upgrades them to
//! WebSocket and runs one read loop per session. Requests are dispatched by
//! variant; stream termination always removes the session's members.

use crate::broadcast::{close_departed, BroadcastEngine, RelayOutcome};
use crate::config::{ConfigError, ServerConfig};
use crate::registry::Registry;
use crate::session::{Session, SessionId, DEFAULT_SEND_TIMEOUT};
use futures::StreamExt;
use relay_core::{
    DumpResponse, GetViewResponse, JoinRequest, LeaveRequest, ProtocolError, RegisterViewRequest,
    Request, Response,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// The relay: a membership registry plus the sessions feeding it.
pub struct RelayServer {
    registry: Arc<Registry>,
    engine: BroadcastEngine,
    /// Counter for generating session IDs
    next_session_id: AtomicU64,
    /// Present when serving over TLS
    tls: Option<TlsAcceptor>,
    /// Bound on each write to a member
    send_timeout: Duration,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    /// Plaintext relay with an empty registry.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            engine: BroadcastEngine::new(Arc::clone(&registry)),
            registry,
            next_session_id: AtomicU64::new(1),
            tls: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Validate `config` and load its TLS material, if any.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut server = Self::new();
        server.send_timeout = config.send_timeout();
        if let Some(files) = &config.tls {
            server.tls = Some(crate::tls::acceptor(files)?);
            info!("TLS enabled with certificate {:?}", files.cert);
        }
        Ok(server)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.accept_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Complete the TLS and WebSocket handshakes, then serve the session.
    pub async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        match &self.tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => self.upgrade(tls_stream, addr).await,
                Err(e) => warn!("TLS handshake failed for {}: {}", addr, e),
            },
            None => self.upgrade(stream, addr).await,
        }
    }

    async fn upgrade<S>(&self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match accept_async(stream).await {
            Ok(ws) => self.serve(ws, Some(addr)).await,
            Err(e) => {
                // Health checks connect and close without finishing the handshake
                debug!("WebSocket upgrade failed for {}: {}", addr, e);
            }
        }
    }

    /// Run the read loop of one session until its stream ends.
    pub async fn serve<S>(&self, ws: WebSocketStream<S>, remote: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (write, mut read) = ws.split();
        let session = Arc::new(
            Session::new(id, remote, Box::pin(write)).with_send_timeout(self.send_timeout),
        );
        info!("New session {} from {:?}", id, remote);

        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Binary(data)) => self.handle_frame(&session, &data).await,
                Ok(Message::Text(text)) => self.handle_frame(&session, text.as_bytes()).await,
                Ok(Message::Close(_)) => {
                    debug!("{} closed by peer", id);
                    break;
                }
                Ok(_) => {
                    // Ping/Pong handled by tungstenite
                }
                Err(e) => {
                    warn!("{} stream error: {}", id, e);
                    break;
                }
            }
        }

        self.session_closed(id).await;
    }

    /// Remove every member bound to a terminated session.
    async fn session_closed(&self, id: SessionId) {
        let changes = self.registry.remove_session(id);
        if !changes.is_empty() {
            info!("{} ended; updating {} cluster(s)", id, changes.len());
        }
        self.engine.push_views(changes).await;
    }

    async fn handle_frame(&self, session: &Arc<Session>, data: &[u8]) {
        match Request::from_json(data) {
            Ok(request) => {
                debug!("{} -> {}", session.id(), request.kind());
                self.handle_request(session, request).await;
            }
            Err(ProtocolError::TooLarge { size, max }) => {
                warn!(
                    "Dropping {} byte frame from {} (limit {})",
                    size,
                    session.id(),
                    max
                );
            }
            Err(e) => {
                warn!("Protocol violation from {}: {}", session.id(), e);
            }
        }
    }

    pub async fn handle_request(&self, session: &Arc<Session>, request: Request) {
        match request {
            Request::Join(JoinRequest { cluster, address }) => {
                debug!("{} joins {}", address, cluster);
                match self.registry.join(&cluster, address, Arc::clone(session)) {
                    Some(change) => self.engine.push_view(change).await,
                    None => debug!("Duplicate join to {} ignored", cluster),
                }
            }
            Request::Leave(LeaveRequest { cluster, address }) => {
                let departure = self.registry.leave(&cluster, &address);
                if departure.removed() {
                    info!("{} left {}", address, cluster);
                }
                self.reply(session, &Response::LeaveAck).await;
                close_departed(&departure.departed).await;
                if let Some(change) = departure.view_change {
                    self.engine.push_view(change).await;
                }
            }
            Request::RegisterView(RegisterViewRequest {
                cluster,
                view,
                address,
            }) => {
                self.registry
                    .register_view(&cluster, &view.members, address, Arc::clone(session));
                self.reply(session, &Response::RegisterViewAck).await;
            }
            Request::GetView(request) => {
                let view = self.registry.get_view(&request.cluster);
                self.reply(session, &Response::GetViewResponse(GetViewResponse { view }))
                    .await;
            }
            Request::Message(envelope) => {
                if let RelayOutcome::Delivered { failed, .. } = self.engine.relay(envelope).await {
                    if failed > 0 {
                        debug!("{} recipient(s) removed after failed relay", failed);
                    }
                }
            }
            Request::Dump => {
                let text = self.dump();
                self.reply(session, &Response::DumpResponse(DumpResponse { text }))
                    .await;
            }
        }
    }

    /// Text listing of every cluster and its members.
    pub fn dump(&self) -> String {
        self.registry.dump()
    }

    async fn reply(&self, session: &Session, response: &Response) {
        if let Err(e) = session.send(response).await {
            warn!("Failed to send {} to {}: {}", response.kind(), session.id(), e);
        }
    }
}

//! Member sessions.
//!
//! A session is the relay's end of one member connection. It owns the write
//! half of the WebSocket; the read half is driven by the server's per-session
//! task. Writes are serialized by the session's own lock, which is never held
//! together with a registry lock.
//!
//! Every write, including the wait for the lock, is bounded by the session's
//! send timeout. A peer that stops draining its socket fails its writes
//! within that bound, so the fan-out that reached it can move on.

use futures::{Sink, SinkExt};
use relay_core::{ProtocolError, Response};
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

/// Write half of a member connection, independent of the underlying stream type.
pub type SessionSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Default upper bound on a single write to a member.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Identity of a session, unique for the lifetime of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to send to {id}: {source}")]
    Send {
        id: SessionId,
        #[source]
        source: WsError,
    },

    #[error("Send to {id} timed out after {after:?}")]
    Timeout { id: SessionId, after: Duration },

    #[error("Failed to encode response: {0}")]
    Encode(#[from] ProtocolError),
}

/// A live connection between one member and the relay.
pub struct Session {
    id: SessionId,
    /// Remote socket address, if the session came from a TCP connection
    remote: Option<SocketAddr>,
    /// Write half, serialized across concurrent senders
    write: Mutex<SessionSink>,
    send_timeout: Duration,
}

impl Session {
    pub fn new(id: SessionId, remote: Option<SocketAddr>, write: SessionSink) -> Self {
        Self {
            id,
            remote,
            write: Mutex::new(write),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Wrap any frame sink as a session.
    pub fn from_sink<S>(id: SessionId, sink: S) -> Self
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
    {
        Self::new(id, None, Box::pin(sink))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Encode and send a single response.
    pub async fn send(&self, response: &Response) -> Result<(), SessionError> {
        let frame = response.to_json()?;
        self.send_frame(&frame).await
    }

    /// Send an already-encoded frame.
    ///
    /// Fan-out paths encode once and call this for every recipient.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), SessionError> {
        let send = async {
            let mut write = self.write.lock().await;
            write.send(Message::Binary(frame.to_vec())).await
        };
        match timeout(self.send_timeout, send).await {
            Ok(result) => result.map_err(|source| SessionError::Send {
                id: self.id,
                source,
            }),
            Err(_) => Err(SessionError::Timeout {
                id: self.id,
                after: self.send_timeout,
            }),
        }
    }

    /// Close the session gracefully.
    ///
    /// Waits for an in-flight write to finish, within the send timeout. A
    /// peer that cannot take the close frame in time is left for its read
    /// loop to notice.
    pub async fn close(&self) {
        let close = async {
            let mut write = self.write.lock().await;
            write.close().await
        };
        match timeout(self.send_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing {}: {}", self.id, e),
            Err(_) => warn!("Close of {} timed out after {:?}", self.id, self.send_timeout),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use futures::channel::mpsc;

    /// A session backed by an in-memory channel, plus the receiving end.
    pub fn channel_session(id: u64) -> (std::sync::Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded();
        let sink = tx.sink_map_err(|_| WsError::ConnectionClosed);
        (std::sync::Arc::new(Session::from_sink(SessionId::new(id), sink)), rx)
    }

    /// Sink that never becomes ready, like a peer with a full TCP window.
    pub struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = WsError;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), WsError>> {
            std::task::Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), WsError> {
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), WsError>> {
            std::task::Poll::Pending
        }

        fn poll_close(
            self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), WsError>> {
            std::task::Poll::Pending
        }
    }

    /// A session whose writes never complete.
    pub fn stalled_session(id: u64, send_timeout: Duration) -> std::sync::Arc<Session> {
        std::sync::Arc::new(
            Session::from_sink(SessionId::new(id), StalledSink).with_send_timeout(send_timeout),
        )
    }

    /// Drain every response currently buffered in a channel session.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Response> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = rx.try_next() {
            if let Message::Binary(data) = msg {
                out.push(Response::from_json(&data).expect("valid response frame"));
            }
        }
        out
    }

    /// Collect only the views from a drained channel session.
    pub fn views(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<relay_core::View> {
        drain(rx)
            .into_iter()
            .filter_map(|r| match r {
                Response::View(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_send_encodes_json_frame() {
        let (session, mut rx) = channel_session(1);
        session.send(&Response::LeaveAck).await.unwrap();

        let responses = drain(&mut rx);
        assert_eq!(responses, vec![Response::LeaveAck]);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (session, rx) = channel_session(2);
        drop(rx);

        let err = session.send(&Response::RegisterViewAck).await.unwrap_err();
        assert!(matches!(err, SessionError::Send { .. }));
        assert!(err.to_string().contains("session-2"));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let (session, mut rx) = channel_session(3);
        session.close().await;
        assert!(rx.try_next().unwrap().is_none());
    }

    // ==================== slow peers ====================

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_times_out() {
        let session = stalled_session(4, Duration::from_millis(100));

        let err = session.send(&Response::LeaveAck).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));

        // The lock is free again: a second send also fails within the bound
        let err = session.send(&Response::LeaveAck).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_of_stalled_session_returns() {
        let session = stalled_session(5, Duration::from_millis(100));
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_write() {
        let (session, mut rx) = channel_session(6);

        // Another writer holds the lock while close is requested
        let guard = session.write.lock().await;
        let closing = {
            let session = std::sync::Arc::clone(&session);
            tokio::spawn(async move { session.close().await })
        };
        tokio::task::yield_now().await;
        drop(guard);
        closing.await.unwrap();

        assert!(rx.try_next().unwrap().is_none());
    }
}

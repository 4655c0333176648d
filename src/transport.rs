//! Transport seam: how a session opens its duplex connection.
//!
//! DESIGN
//! ======
//! A [`Transport`] is a text sink plus a stream of [`TransportEvent`]s. The
//! session never sees the underlying socket, so the production websocket
//! connector and the in-memory test connector are interchangeable.
//!
//! Non-text frames (binary, control ping/pong) are dropped here; the state
//! protocol only speaks JSON text.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;

pub type TextSink = Pin<Box<dyn Sink<String, Error = SessionError> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Something that happened on the inbound side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text message arrived.
    Text(String),
    /// The peer closed the connection.
    Closed,
    /// The transport failed.
    Error(String),
}

/// An open duplex connection.
pub struct Transport {
    pub sink: TextSink,
    pub events: EventStream,
}

/// Opens transports for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn open(&self, url: &str) -> Result<Transport, SessionError>;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Transport, SessionError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Connect(Box::new(e)))?;
        let (sink, stream) = stream.split();

        let sink = sink
            .sink_map_err(|e| SessionError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, SessionError>(Message::Text(text.into()))));

        let events = stream.filter_map(|msg| future::ready(ws_event(msg)));

        Ok(Transport { sink: Box::pin(sink), events: Box::pin(events) })
    }
}

fn ws_event(msg: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<TransportEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(TransportEvent::Text(text.as_str().to_owned())),
        Ok(Message::Close(_)) => Some(TransportEvent::Closed),
        Ok(_) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;

    /// In-memory connector. Every successful `open` hands the server side of
    /// the new connection to the test as a [`MockPeer`].
    pub struct MockConnector {
        failures: AtomicUsize,
        attempts: AtomicUsize,
        peers: mpsc::UnboundedSender<MockPeer>,
    }

    impl MockConnector {
        /// Make the next `count` open attempts fail.
        pub fn fail_next(&self, count: usize) {
            self.failures.store(count, Ordering::SeqCst);
        }

        /// Number of `open` calls so far, failed ones included.
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, _url: &str) -> Result<Transport, SessionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(SessionError::Transport("connection refused".into()));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

            let sink = futures_util::sink::unfold(out_tx, |tx, text: String| async move {
                tx.send(text).map_err(|_| SessionError::Closed)?;
                Ok::<_, SessionError>(tx)
            });
            let events = futures_util::stream::unfold(in_rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            });

            let _ = self.peers.send(MockPeer { outbound: out_rx, inbound: in_tx });
            Ok(Transport { sink: Box::pin(sink), events: Box::pin(events) })
        }
    }

    /// Server side of one mock connection.
    pub struct MockPeer {
        /// Messages the client sent.
        pub outbound: mpsc::UnboundedReceiver<String>,
        /// Events delivered to the client.
        pub inbound: mpsc::UnboundedSender<TransportEvent>,
    }

    impl MockPeer {
        /// Next client message as JSON. Panics after 1s of silence.
        pub async fn recv_json(&mut self) -> Value {
            let text = timeout(Duration::from_secs(1), self.outbound.recv())
                .await
                .expect("client message timed out")
                .expect("client closed the connection");
            serde_json::from_str(&text).expect("client sent invalid json")
        }

        /// Wait until the client drops its end of the connection.
        pub async fn wait_closed(&mut self) {
            timeout(Duration::from_secs(1), async {
                while self.outbound.recv().await.is_some() {}
            })
            .await
            .expect("client did not close the connection");
        }

        pub fn push(&self, value: Value) {
            self.push_raw(value.to_string());
        }

        pub fn push_raw(&self, text: impl Into<String>) {
            let _ = self.inbound.send(TransportEvent::Text(text.into()));
        }

        pub fn close(&self) {
            let _ = self.inbound.send(TransportEvent::Closed);
        }

        pub fn fail(&self, reason: &str) {
            let _ = self.inbound.send(TransportEvent::Error(reason.to_owned()));
        }

        /// Expect `{get: true}` and answer with `state`.
        pub async fn serve_refresh(&mut self, state: Value) {
            assert_eq!(self.recv_json().await, serde_json::json!({ "get": true }));
            self.push(serde_json::json!({ "state": state }));
        }
    }

    pub fn mock_connector() -> (Arc<MockConnector>, mpsc::UnboundedReceiver<MockPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = MockConnector { failures: AtomicUsize::new(0), attempts: AtomicUsize::new(0), peers: tx };
        (Arc::new(connector), rx)
    }

    /// Next accepted connection. Panics after 1s.
    pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
        timeout(Duration::from_secs(1), peers.recv())
            .await
            .expect("no connection attempt succeeded")
            .expect("connector dropped")
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

//! proofwire-link-websocket: WebSocket peer link for proofwire.
//!
//! The reference peer speaks WebSocket, so this is the link relays use by
//! default.
//!
//! # Wire Format
//!
//! Each `send` becomes one binary WebSocket message holding the bytes as-is.
//! Message boundaries carry no meaning: the receiving side sees one ordered
//! byte stream, and a chunk handed out by `recv` is whatever one message
//! carried.
//!
//! # Characteristics
//!
//! - Binary messages only; ping/pong/text frames are skipped on receive
//! - A close frame or the end of the stream reads as end-of-stream
//! - Everything is owned buffers

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use proofwire_core::{Connector, LinkError, LinkRx, LinkTx, PeerLink};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// WebSocket-based peer link.
///
/// Works with any WebSocket stream (TCP, TLS, in-memory).
pub struct WebSocketLink<S> {
    ws: WebSocketStream<S>,
}

impl<S> WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-handshaken WebSocket stream.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    /// Run the server side of the WebSocket handshake over `stream`.
    pub async fn accept(stream: S) -> Result<Self, LinkError> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| LinkError::WebSocket(format!("accept: {e}")))?;
        Ok(Self::new(ws))
    }
}

impl WebSocketLink<tokio::io::DuplexStream> {
    /// A connected pair of in-memory WebSocket links.
    ///
    /// Uses `tokio::io::duplex` with a real client/server handshake.
    pub async fn pair() -> Result<(Self, Self), LinkError> {
        let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);

        let (client, server) = tokio::join!(
            tokio_tungstenite::client_async("ws://localhost/", client_stream),
            Self::accept(server_stream),
        );
        let (ws, _response) =
            client.map_err(|e| LinkError::WebSocket(format!("client handshake: {e}")))?;

        Ok((Self::new(ws), server?))
    }
}

impl<S> PeerLink for WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Tx = WsTx<S>;
    type Rx = WsRx<S>;

    fn split(self) -> (Self::Tx, Self::Rx) {
        let (sink, stream) = self.ws.split();
        (WsTx { sink }, WsRx { stream })
    }
}

/// Sending half: one binary message per `send`.
pub struct WsTx<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> LinkTx for WsTx<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), LinkError> {
        self.sink
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => LinkError::PeerClosed,
                e => LinkError::WebSocket(format!("send: {e}")),
            })
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(LinkError::WebSocket(format!("close: {e}"))),
        }
    }
}

/// Receiving half: yields the payload of each binary message.
pub struct WsRx<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> LinkRx for WsRx<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        loop {
            let msg = match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                Some(Err(e)) => return Err(LinkError::WebSocket(format!("recv: {e}"))),
            };

            match msg {
                Message::Binary(data) => return Ok(Some(data.to_vec())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "websocket peer sent close");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => {
                    continue;
                }
            }
        }
    }
}

/// Opens WebSocket links with `connect_async`. Accepts `ws://` URLs, and
/// `wss://` when tokio-tungstenite is built with a TLS backend.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WebSocketLink<MaybeTlsStream<TcpStream>>;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, LinkError> {
        let (ws, response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| LinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(%endpoint, status = %response.status(), "websocket peer link connected");
        Ok(WebSocketLink::new(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_binary_messages_both_ways() {
        let (a, b) = WebSocketLink::pair().await.unwrap();
        let (mut a_tx, mut a_rx) = a.split();
        let (mut b_tx, mut b_rx) = b.split();

        a_tx.send(b"from a".to_vec()).await.unwrap();
        b_tx.send(b"from b".to_vec()).await.unwrap();

        assert_eq!(b_rx.recv().await.unwrap().unwrap(), b"from a");
        assert_eq!(a_rx.recv().await.unwrap().unwrap(), b"from b");
    }

    #[tokio::test]
    async fn test_close_frame_reads_as_end_of_stream() {
        let (a, b) = WebSocketLink::pair().await.unwrap();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.send(vec![1, 2, 3]).await.unwrap();
        a_tx.close().await.unwrap();

        assert_eq!(b_rx.recv().await.unwrap().unwrap(), vec![1, 2, 3]);
        assert!(b_rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connector_reports_refused_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsConnector
            .connect(&format!("ws://{addr}"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_connector_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut tx, mut rx) = WebSocketLink::accept(stream).await.unwrap().split();
            let got = rx.recv().await.unwrap().unwrap();
            tx.send(got).await.unwrap();
        });

        let (mut tx, mut rx) = WsConnector
            .connect(&format!("ws://{addr}"))
            .await
            .unwrap()
            .split();
        tx.send(b"echo me".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), b"echo me");
        server.await.unwrap();
    }
}

/// Conformance tests using proofwire-testkit.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use proofwire_testkit::{LinkFactory, TestError};

    struct WebSocketFactory;

    impl LinkFactory for WebSocketFactory {
        type Link = WebSocketLink<tokio::io::DuplexStream>;

        async fn connect_pair() -> Result<(Self::Link, Self::Link), TestError> {
            Ok(WebSocketLink::pair().await?)
        }
    }

    #[tokio::test]
    async fn ordered_both_directions() {
        proofwire_testkit::run_ordered_both_directions::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn close_detected() {
        proofwire_testkit::run_close_detected::<WebSocketFactory>().await;
    }

    #[tokio::test]
    async fn large_transfer() {
        proofwire_testkit::run_large_transfer::<WebSocketFactory>().await;
    }
}

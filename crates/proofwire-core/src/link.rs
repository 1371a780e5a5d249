//! Peer links: the relay worker's duplex byte channel to the remote party.
//!
//! A link only moves bytes. It must keep their order in both directions and
//! must not hold on to outbound bytes once `send` has returned.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::error::LinkError;

/// Size of the read buffer used by stream links.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Sending half of a peer link.
pub trait LinkTx: Send + 'static {
    /// Transmit `bytes` and push them out of any local buffering.
    fn send(&mut self, bytes: Vec<u8>) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Close the outgoing direction.
    fn close(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// Receiving half of a peer link.
pub trait LinkRx: Send + 'static {
    /// Next chunk from the peer, or `None` once the peer has closed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, LinkError>> + Send;
}

/// A duplex byte channel that can be split into independent halves.
pub trait PeerLink: Send + 'static {
    type Tx: LinkTx;
    type Rx: LinkRx;

    fn split(self) -> (Self::Tx, Self::Rx);
}

/// Opens a [`PeerLink`] to an endpoint.
pub trait Connector: Send + Sync + 'static {
    type Link: PeerLink;

    fn connect(&self, endpoint: &str) -> impl Future<Output = Result<Self::Link, LinkError>> + Send;
}

// ============================================================================
// Byte-stream link
// ============================================================================

/// A link over any tokio byte stream (TCP, Unix socket, in-memory duplex).
///
/// Bytes are written as-is; there is no framing.
pub struct StreamLink<S> {
    stream: S,
    read_chunk: usize,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    /// Override the maximum chunk size returned by `recv`.
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }
}

impl StreamLink<tokio::io::DuplexStream> {
    /// A connected pair of in-memory links.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(DEFAULT_READ_CHUNK);
        (Self::new(a), Self::new(b))
    }
}

impl<S> PeerLink for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Tx = StreamTx<S>;
    type Rx = StreamRx<S>;

    fn split(self) -> (Self::Tx, Self::Rx) {
        let (read, write) = tokio::io::split(self.stream);
        (
            StreamTx { write },
            StreamRx {
                read,
                buf: vec![0u8; self.read_chunk],
            },
        )
    }
}

pub struct StreamTx<S> {
    write: WriteHalf<S>,
}

impl<S> LinkTx for StreamTx<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), LinkError> {
        self.write.write_all(&bytes).await?;
        self.write.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.write.shutdown().await?;
        Ok(())
    }
}

pub struct StreamRx<S> {
    read: ReadHalf<S>,
    buf: Vec<u8>,
}

impl<S> LinkRx for StreamRx<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        let n = self.read.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }
}

/// Connects raw TCP links. Accepts `host:port` or `tcp://host:port`.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Link = StreamLink<TcpStream>;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, LinkError> {
        let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| LinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        tracing::debug!(%endpoint, "tcp peer link connected");
        Ok(StreamLink::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_pair_moves_bytes_both_ways() {
        let (a, b) = StreamLink::pair();
        let (mut a_tx, mut a_rx) = a.split();
        let (mut b_tx, mut b_rx) = b.split();

        a_tx.send(b"from a".to_vec()).await.unwrap();
        b_tx.send(b"from b".to_vec()).await.unwrap();

        assert_eq!(b_rx.recv().await.unwrap().unwrap(), b"from a");
        assert_eq!(a_rx.recv().await.unwrap().unwrap(), b"from b");
    }

    #[tokio::test]
    async fn test_close_reads_as_end_of_stream() {
        let (a, b) = StreamLink::pair();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.close().await.unwrap();
        assert!(b_rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_connector_reports_refused_endpoint() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = format!("tcp://{addr}");
        let err = TcpConnector.connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, LinkError::Connect { .. }));
    }
}

//! proofwire-testkit: conformance suite for peer links, plus session fixtures.
//!
//! Provides the `LinkFactory` trait and shared scenarios every link must pass,
//! and the scripted computations, connectors and peers that the session tests
//! are built from.
//!
//! # Usage
//!
//! Each link crate implements `LinkFactory` and runs the shared scenarios:
//!
//! ```ignore
//! use proofwire_testkit::{LinkFactory, TestError};
//!
//! struct MyLinkFactory;
//!
//! impl LinkFactory for MyLinkFactory {
//!     type Link = MyLink;
//!
//!     async fn connect_pair() -> Result<(Self::Link, Self::Link), TestError> {
//!         /* create connected pair */
//!     }
//! }
//!
//! #[tokio::test]
//! async fn ordered_both_directions() {
//!     proofwire_testkit::run_ordered_both_directions::<MyLinkFactory>().await;
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use proofwire_core::{
    Artifact, Connector, LinkError, LinkRx, LinkTx, PeerLink, ProofIo, WorkerError,
};
use tokio::task::JoinHandle;

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Link creation failed.
    Setup(String),
    /// Link error.
    Link(LinkError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Link(e) => write!(f, "link error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<LinkError> for TestError {
    fn from(e: LinkError) -> Self {
        TestError::Link(e)
    }
}

/// Factory trait for creating link pairs for testing.
pub trait LinkFactory: Send + Sync + 'static {
    /// The link type being tested.
    type Link: PeerLink;

    /// Create a connected pair of links.
    ///
    /// Bytes sent on one side are received on the other, in both directions.
    fn connect_pair() -> impl Future<Output = Result<(Self::Link, Self::Link), TestError>> + Send;
}

/// Deterministic filler so a reordered or dropped byte shows up.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Read from `rx` until exactly `len` bytes have arrived.
pub async fn recv_exact<R: LinkRx>(rx: &mut R, len: usize) -> Result<Vec<u8>, TestError> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        match rx.recv().await? {
            Some(chunk) => out.extend_from_slice(&chunk),
            None => {
                return Err(TestError::Assertion(format!(
                    "stream ended after {} of {} bytes",
                    out.len(),
                    len
                )))
            }
        }
    }
    if out.len() != len {
        return Err(TestError::Assertion(format!(
            "expected {} bytes, got {}",
            len,
            out.len()
        )));
    }
    Ok(out)
}

// ============================================================================
// Link scenarios
// ============================================================================

/// Several sends each way, interleaved; each direction must arrive in order.
pub async fn run_ordered_both_directions<F: LinkFactory>() {
    let result = run_ordered_both_directions_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_ordered_both_directions failed: {}", e);
    }
}

async fn run_ordered_both_directions_inner<F: LinkFactory>() -> Result<(), TestError> {
    let (a, b) = F::connect_pair().await?;
    let (mut a_tx, mut a_rx) = a.split();
    let (mut b_tx, mut b_rx) = b.split();

    let a_to_b: Vec<Vec<u8>> = (0..8).map(|i| pattern(17 * (i + 1), i as u8)).collect();
    let b_to_a: Vec<Vec<u8>> = (0..8).map(|i| pattern(5 * (i + 1), 100 + i as u8)).collect();

    for (x, y) in a_to_b.iter().zip(&b_to_a) {
        a_tx.send(x.clone()).await?;
        b_tx.send(y.clone()).await?;
    }

    let expected_b: Vec<u8> = a_to_b.concat();
    let expected_a: Vec<u8> = b_to_a.concat();
    let got_b = recv_exact(&mut b_rx, expected_b.len()).await?;
    let got_a = recv_exact(&mut a_rx, expected_a.len()).await?;

    if got_b != expected_b {
        return Err(TestError::Assertion("a → b bytes out of order".into()));
    }
    if got_a != expected_a {
        return Err(TestError::Assertion("b → a bytes out of order".into()));
    }
    Ok(())
}

/// Closing one side reads as end-of-stream on the other, after pending bytes.
pub async fn run_close_detected<F: LinkFactory>() {
    let result = run_close_detected_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_close_detected failed: {}", e);
    }
}

async fn run_close_detected_inner<F: LinkFactory>() -> Result<(), TestError> {
    let (a, b) = F::connect_pair().await?;
    let (mut a_tx, _a_rx) = a.split();
    let (_b_tx, mut b_rx) = b.split();

    a_tx.send(b"last words".to_vec()).await?;
    a_tx.close().await?;

    let got = recv_exact(&mut b_rx, 10).await?;
    if got != b"last words" {
        return Err(TestError::Assertion("bytes before close were lost".into()));
    }

    let next = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
        .await
        .map_err(|_| TestError::Assertion("close was never observed".into()))??;
    if next.is_some() {
        return Err(TestError::Assertion("data after close".into()));
    }
    Ok(())
}

/// A few megabytes one way while the other side echoes them back.
pub async fn run_large_transfer<F: LinkFactory>() {
    let result = run_large_transfer_inner::<F>().await;
    if let Err(e) = result {
        panic!("run_large_transfer failed: {}", e);
    }
}

async fn run_large_transfer_inner<F: LinkFactory>() -> Result<(), TestError> {
    const TOTAL: usize = 2 * 1024 * 1024;
    const CHUNK: usize = 32 * 1024;

    let (a, b) = F::connect_pair().await?;
    let (mut a_tx, mut a_rx) = a.split();
    let echo = echo_peer(b);

    let data = pattern(TOTAL, 7);
    let sender = tokio::spawn(async move {
        for chunk in data.chunks(CHUNK) {
            a_tx.send(chunk.to_vec()).await?;
        }
        Ok::<_, TestError>(a_tx)
    });

    let got = recv_exact(&mut a_rx, TOTAL).await?;
    let mut a_tx = sender
        .await
        .map_err(|e| TestError::Setup(format!("sender task panicked: {}", e)))??;
    a_tx.close().await?;
    let seen = echo
        .await
        .map_err(|e| TestError::Setup(format!("echo task panicked: {}", e)))??;

    if got != pattern(TOTAL, 7) || seen.len() != TOTAL {
        return Err(TestError::Assertion("echoed bytes differ".into()));
    }
    Ok(())
}

// ============================================================================
// Session fixtures
// ============================================================================

/// Echo every byte back until the far side closes. Resolves to everything seen.
pub fn echo_peer<L: PeerLink>(link: L) -> JoinHandle<Result<Vec<u8>, TestError>> {
    tokio::spawn(async move {
        let (mut tx, mut rx) = link.split();
        let mut seen = Vec::new();
        while let Some(chunk) = rx.recv().await? {
            seen.extend_from_slice(&chunk);
            tx.send(chunk).await?;
        }
        let _ = tx.close().await;
        Ok(seen)
    })
}

/// Hands out one pre-built link; every later connect is refused.
pub struct PairConnector<L> {
    link: Mutex<Option<L>>,
}

impl<L> PairConnector<L> {
    pub fn new(link: L) -> Self {
        Self {
            link: Mutex::new(Some(link)),
        }
    }
}

impl<L: PeerLink> Connector for PairConnector<L> {
    type Link = L;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, LinkError> {
        self.link.lock().take().ok_or_else(|| LinkError::Connect {
            endpoint: endpoint.to_string(),
            reason: "link already handed out".into(),
        })
    }
}

/// Refuses every connection.
#[derive(Debug, Default)]
pub struct RefusingConnector;

impl Connector for RefusingConnector {
    type Link = proofwire_core::StreamLink<tokio::io::DuplexStream>;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, LinkError> {
        Err(LinkError::Connect {
            endpoint: endpoint.to_string(),
            reason: "connection refused".into(),
        })
    }
}

/// Computation closure type used by the scripted computations below.
pub type Script = Box<dyn FnMut(&Artifact, &str, &mut ProofIo) -> Result<String, WorkerError> + Send>;

/// Write each round, flush, read the same bytes back from the peer.
///
/// Pairs with [`echo_peer`]. Fails the proof if an echo differs.
pub fn echo_rounds(rounds: Vec<Vec<u8>>) -> Script {
    Box::new(move |_: &Artifact, _: &str, io: &mut ProofIo| -> Result<String, WorkerError> {
        for (i, round) in rounds.iter().enumerate() {
            io.write_bytes(round)?;
            io.flush();
            let mut back = vec![0u8; round.len()];
            io.read_exact(&mut back)?;
            if &back != round {
                return Ok(format!("round {i}: echoed bytes differ"));
            }
        }
        Ok(String::new())
    })
}

/// Ends immediately with `diagnostic` (empty means accepted).
pub fn verdict(diagnostic: impl Into<String>) -> Script {
    let diagnostic = diagnostic.into();
    Box::new(move |_: &Artifact, _: &str, _: &mut ProofIo| -> Result<String, WorkerError> {
        Ok(diagnostic.clone())
    })
}

/// Writes `bytes` and flushes, then blocks for a reply that never comes.
pub fn write_then_wait(bytes: Vec<u8>) -> Script {
    Box::new(move |_: &Artifact, _: &str, io: &mut ProofIo| -> Result<String, WorkerError> {
        io.write_bytes(&bytes)?;
        io.flush();
        io.read_byte()?;
        Ok(String::new())
    })
}

/// Checks the witness text equals `expected`.
pub fn expect_witness(expected: impl Into<String>) -> Script {
    let expected = expected.into();
    Box::new(move |_: &Artifact, witness: &str, _: &mut ProofIo| -> Result<String, WorkerError> {
        if witness == expected {
            Ok(String::new())
        } else {
            Ok(format!("unexpected witness {witness}"))
        }
    })
}

/// Byte-stream conformance, run here since the stream link lives in core.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use proofwire_core::StreamLink;

    struct StreamFactory;

    impl LinkFactory for StreamFactory {
        type Link = StreamLink<tokio::io::DuplexStream>;

        async fn connect_pair() -> Result<(Self::Link, Self::Link), TestError> {
            Ok(StreamLink::pair())
        }
    }

    #[tokio::test]
    async fn ordered_both_directions() {
        run_ordered_both_directions::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn close_detected() {
        run_close_detected::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn large_transfer() {
        run_large_transfer::<StreamFactory>().await;
    }
}

//! proofwire: run an interactive proof computation against a remote peer.
//!
//! A session moves the prover's traffic through two byte rings shared by a
//! compute worker (running the computation on its own thread) and a relay
//! worker (bridging the rings to the network). The controller allocates the
//! rings, drives both workers through a small control protocol and publishes
//! progress and the final verdict.
//!
//! # Quick Start
//!
//! ```ignore
//! use proofwire::prelude::*;
//!
//! let controller = ProofController::new(SessionConfig::from_env()?, WsConnector::default());
//! let path = Path::from(vec![[1281189i64, 441367], [1281284, 441831]]);
//!
//! let session = controller.start(artifact, &path, my_computation)?;
//! let mut progress = session.progress();
//! let report = session.wait().await?;
//! println!("{}", report.summary());
//! ```
//!
//! # Links
//!
//! The relay talks to the peer through any [`Connector`]:
//!
//! - [`TcpConnector`]: raw TCP byte stream
//! - **websocket** (default feature): `WsConnector`, binary WebSocket messages

pub mod config;
pub mod controller;
pub mod outcome;
mod progress;
pub mod worker;

pub use config::{websocket_url, ConfigError, RelayConfig, SessionConfig, DEFAULT_PEER_PORT};
pub use controller::{ProofController, ProofSession};
pub use outcome::{Outcome, SessionError, SessionReport};

pub use proofwire_core::{
    Artifact, Completion, Computation, Connector, LinkError, LinkRx, LinkTx, Path, PeerLink,
    ProofIo, ProtocolError, Role, SessionState, StreamLink, TcpConnector, WitnessError,
    WitnessPayload, WorkerError,
};

/// The shared-memory transport, for callers that want to look at the rings.
pub mod shm {
    pub use proofwire_core::shm::*;
}

#[cfg(feature = "websocket")]
pub use proofwire_link_websocket::{WebSocketLink, WsConnector};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use proofwire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Artifact, Computation, Outcome, Path, ProofController, ProofIo, ProofSession,
        SessionConfig, SessionReport, TcpConnector, WorkerError,
    };

    #[cfg(feature = "websocket")]
    pub use crate::WsConnector;
}

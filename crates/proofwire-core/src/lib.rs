//! proofwire-core: the pieces every proofwire crate agrees on.
//!
//! - [`protocol`]: control messages between the controller and its workers,
//!   the worker-side [`ProtocolGate`] and the controller-side
//!   [`SessionState`] lifecycle
//! - [`compute`]: the [`Computation`] trait and the [`ProofIo`] byte API it
//!   runs against
//! - [`link`]: the relay's duplex [`PeerLink`] abstraction plus a raw
//!   byte-stream implementation
//! - [`witness`]: path to witness payload encoding
//! - [`error`]: error types for each layer

pub mod compute;
pub mod error;
pub mod link;
pub mod protocol;
pub mod witness;

pub use compute::{Computation, ProofIo};
pub use error::{LinkError, ProtocolError, WitnessError, WorkerError};
pub use link::{Connector, LinkRx, LinkTx, PeerLink, StreamLink, TcpConnector, DEFAULT_READ_CHUNK};
pub use protocol::{
    Artifact, Completion, ControlMessage, Fault, Handshake, ProtocolGate, Role, SessionState,
    TransportView, WorkerEvent,
};
pub use witness::{Path, WitnessPayload};

pub use proofwire_transport_shm as shm;

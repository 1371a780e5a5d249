//! Error types shared by the workers and the controller.

use proofwire_transport_shm::RingError;
use thiserror::Error;

use crate::protocol::Role;

/// Errors from a peer link (the network side of the relay).
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Out-of-order or malformed control traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{role} worker expected a handshake first, got `{got}`")]
    HandshakeNotFirst { role: Role, got: &'static str },

    #[error("{role} worker received a second handshake")]
    DuplicateHandshake { role: Role },

    #[error("compute worker received `exec` more than once")]
    DuplicateExec,

    #[error("{role} worker cannot handle `{got}`")]
    Unexpected { role: Role, got: &'static str },

    #[error("{role} worker was handed a view for the wrong role")]
    WrongView { role: Role },

    #[error("{role} worker attached to session {actual}, expected {expected}")]
    SessionMismatch {
        role: Role,
        expected: u64,
        actual: u64,
    },

    #[error("session cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("{role} worker went away")]
    WorkerGone { role: Role },
}

/// Witness encoding failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WitnessError {
    #[error("coordinate {index}.{axis} is not finite: {value}")]
    NonFinite {
        index: usize,
        axis: usize,
        value: f64,
    },

    #[error("coordinate {index}.{axis} is out of range: {value}")]
    OutOfRange {
        index: usize,
        axis: usize,
        value: f64,
    },

    #[error("witness JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for WitnessError {
    fn from(e: serde_json::Error) -> Self {
        WitnessError::Json(e.to_string())
    }
}

/// Anything that can stop a worker before its work is done.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The computation itself broke (as opposed to rejecting the proof).
    #[error("computation aborted: {0}")]
    Aborted(String),
}

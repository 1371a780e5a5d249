//! Control protocol between the controller and its two workers.
//!
//! Control traffic never shares a primitive with the byte stream: it travels
//! over ordinary channels while the proof bytes go through the rings.
//!
//! ```text
//! controller ── Handshake ──► compute      controller ── Handshake ──► relay
//! controller ◄── Ready ────── compute      controller ◄── Ready ────── relay
//! controller ── Exec ───────► compute
//! controller ◄── Flush ────── compute  ──► controller ── Flush ──────► relay
//! controller ◄── Completed ── compute      controller ── Shutdown ───► relay
//! ```

use std::fmt;
use std::sync::Arc;

use proofwire_transport_shm::{ComputeView, RelayView};

use crate::error::ProtocolError;

/// Which worker a message concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Compute,
    Relay,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Compute => f.write_str("compute"),
            Role::Relay => f.write_str("relay"),
        }
    }
}

/// The compiled computation handed to the compute worker. Opaque bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact(Arc<[u8]>);

impl Artifact {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Artifact({} bytes)", self.0.len())
    }
}

/// A worker's non-owning view of the shared transport.
#[derive(Debug, Clone)]
pub enum TransportView {
    Compute(ComputeView),
    Relay(RelayView),
}

impl TransportView {
    pub fn session_id(&self) -> u64 {
        match self {
            TransportView::Compute(v) => v.session_id(),
            TransportView::Relay(v) => v.session_id(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            TransportView::Compute(_) => Role::Compute,
            TransportView::Relay(_) => Role::Relay,
        }
    }
}

/// First message a worker receives. Read exactly once.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Identity of the buffers the controller allocated.
    pub session_id: u64,
    pub view: TransportView,
    /// Remote endpoint; only meaningful for the relay.
    pub endpoint: Option<String>,
}

/// Controller to worker.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    Handshake(Handshake),
    Exec { artifact: Artifact, witness: String },
    Flush,
    Shutdown,
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Handshake(_) => "handshake",
            ControlMessage::Exec { .. } => "exec",
            ControlMessage::Flush => "flush",
            ControlMessage::Shutdown => "shutdown",
        }
    }
}

/// Why a worker stopped without producing a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Overflow(String),
    Transport(String),
    Protocol(String),
    /// The computation broke instead of producing a verdict.
    Aborted(String),
}

/// The compute worker's final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub success: bool,
    /// Diagnostic text; set whenever `success` is false.
    pub message: Option<String>,
    pub fault: Option<Fault>,
}

impl Completion {
    /// Interpret the computation's diagnostic: empty means every check passed.
    pub fn from_diagnostic(diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        if diagnostic.is_empty() {
            Self {
                success: true,
                message: None,
                fault: None,
            }
        } else {
            Self {
                success: false,
                message: Some(diagnostic),
                fault: None,
            }
        }
    }

    pub fn faulted(fault: Fault) -> Self {
        let message = match &fault {
            Fault::Overflow(m)
            | Fault::Transport(m)
            | Fault::Protocol(m)
            | Fault::Aborted(m) => m.clone(),
        };
        Self {
            success: false,
            message: Some(message),
            fault: Some(fault),
        }
    }
}

/// Worker to controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Handshake accepted; echoes the buffer identity the worker attached to.
    Ready { role: Role, session_id: u64 },
    /// Outbound bytes should leave promptly.
    Flush,
    Completed(Completion),
    /// The relay lost its peer or its buffers.
    RelayFailed(Fault),
    /// A worker rejected control traffic and stopped.
    Violation { role: Role, message: String },
}

/// Worker-side enforcement of message order.
///
/// `Handshake` must come first and only once; `Exec` is compute-only and
/// accepted once; `Flush`/`Shutdown` are relay-only.
#[derive(Debug, Clone)]
pub struct ProtocolGate {
    role: Role,
    session_id: Option<u64>,
    executed: bool,
}

impl ProtocolGate {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            session_id: None,
            executed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Session attached at handshake, if any.
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn has_executed(&self) -> bool {
        self.executed
    }

    /// Validate `msg` against everything seen so far and record it.
    pub fn admit(&mut self, msg: &ControlMessage) -> Result<(), ProtocolError> {
        let role = self.role;
        match (self.session_id, msg) {
            (None, ControlMessage::Handshake(hs)) => {
                if hs.view.role() != role {
                    return Err(ProtocolError::WrongView { role });
                }
                if hs.view.session_id() != hs.session_id {
                    return Err(ProtocolError::SessionMismatch {
                        role,
                        expected: hs.session_id,
                        actual: hs.view.session_id(),
                    });
                }
                self.session_id = Some(hs.session_id);
                Ok(())
            }
            (None, other) => Err(ProtocolError::HandshakeNotFirst {
                role,
                got: other.kind(),
            }),
            (Some(_), ControlMessage::Handshake(_)) => {
                Err(ProtocolError::DuplicateHandshake { role })
            }
            (Some(_), ControlMessage::Exec { .. }) => match role {
                Role::Compute if self.executed => Err(ProtocolError::DuplicateExec),
                Role::Compute => {
                    self.executed = true;
                    Ok(())
                }
                Role::Relay => Err(ProtocolError::Unexpected { role, got: "exec" }),
            },
            (Some(_), ControlMessage::Flush | ControlMessage::Shutdown) => match role {
                Role::Relay => Ok(()),
                Role::Compute => Err(ProtocolError::Unexpected {
                    role,
                    got: msg.kind(),
                }),
            },
        }
    }
}

/// Controller-side lifecycle of one proof session.
///
/// `Idle → HandshakeSent → Executing → Completed`. Nothing leaves `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    HandshakeSent,
    Executing,
    Completed { success: bool },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::HandshakeSent => "handshake-sent",
            SessionState::Executing => "executing",
            SessionState::Completed { .. } => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionState::Completed { .. })
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// Any live state may jump straight to `Completed` (failures can happen
    /// before `exec` is sent).
    pub fn advance(self, next: SessionState) -> Result<SessionState, ProtocolError> {
        use SessionState::*;
        match (self, next) {
            (Idle, HandshakeSent)
            | (HandshakeSent, Executing)
            | (Idle | HandshakeSent | Executing, Completed { .. }) => Ok(next),
            (from, to) => Err(ProtocolError::InvalidTransition {
                from: from.name(),
                to: to.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwire_transport_shm::{SharedTransport, ShmConfig};

    fn handshake_for(role: Role) -> (ControlMessage, u64) {
        let transport = SharedTransport::new(&ShmConfig {
            capacity: 16,
            stall_timeout: None,
        });
        let view = match role {
            Role::Compute => TransportView::Compute(transport.compute_view()),
            Role::Relay => TransportView::Relay(transport.relay_view()),
        };
        let id = transport.session_id();
        (
            ControlMessage::Handshake(Handshake {
                session_id: id,
                view,
                endpoint: None,
            }),
            id,
        )
    }

    fn exec() -> ControlMessage {
        ControlMessage::Exec {
            artifact: Artifact::new(vec![0u8; 4]),
            witness: "{}".into(),
        }
    }

    #[test]
    fn test_compute_happy_path() {
        let mut gate = ProtocolGate::new(Role::Compute);
        let (hs, id) = handshake_for(Role::Compute);
        gate.admit(&hs).unwrap();
        assert_eq!(gate.session_id(), Some(id));
        gate.admit(&exec()).unwrap();
        assert!(gate.has_executed());
    }

    #[test]
    fn test_exec_before_handshake_is_rejected() {
        let mut gate = ProtocolGate::new(Role::Compute);
        assert_eq!(
            gate.admit(&exec()),
            Err(ProtocolError::HandshakeNotFirst {
                role: Role::Compute,
                got: "exec"
            })
        );
    }

    #[test]
    fn test_second_handshake_is_rejected() {
        let mut gate = ProtocolGate::new(Role::Relay);
        let (hs, _) = handshake_for(Role::Relay);
        gate.admit(&hs).unwrap();
        assert_eq!(
            gate.admit(&hs),
            Err(ProtocolError::DuplicateHandshake { role: Role::Relay })
        );
    }

    #[test]
    fn test_exec_only_once() {
        let mut gate = ProtocolGate::new(Role::Compute);
        gate.admit(&handshake_for(Role::Compute).0).unwrap();
        gate.admit(&exec()).unwrap();
        assert_eq!(gate.admit(&exec()), Err(ProtocolError::DuplicateExec));
    }

    #[test]
    fn test_wrong_view_is_rejected() {
        let mut gate = ProtocolGate::new(Role::Compute);
        let (hs, _) = handshake_for(Role::Relay);
        assert_eq!(
            gate.admit(&hs),
            Err(ProtocolError::WrongView {
                role: Role::Compute
            })
        );
    }

    #[test]
    fn test_relay_accepts_flush_not_exec() {
        let mut gate = ProtocolGate::new(Role::Relay);
        gate.admit(&handshake_for(Role::Relay).0).unwrap();
        gate.admit(&ControlMessage::Flush).unwrap();
        gate.admit(&ControlMessage::Flush).unwrap();
        assert!(matches!(
            gate.admit(&exec()),
            Err(ProtocolError::Unexpected { got: "exec", .. })
        ));
    }

    #[test]
    fn test_completion_from_diagnostic() {
        let ok = Completion::from_diagnostic("");
        assert!(ok.success);
        assert_eq!(ok.message, None);

        let rejected = Completion::from_diagnostic("assertion X failed");
        assert!(!rejected.success);
        assert_eq!(rejected.message.as_deref(), Some("assertion X failed"));
        assert_eq!(rejected.fault, None);
    }

    #[test]
    fn test_session_state_transitions() {
        let s = SessionState::Idle;
        let s = s.advance(SessionState::HandshakeSent).unwrap();
        let s = s.advance(SessionState::Executing).unwrap();
        let done = s.advance(SessionState::Completed { success: true }).unwrap();

        assert!(done.advance(SessionState::Executing).is_err());
        assert!(done
            .advance(SessionState::Completed { success: false })
            .is_err());
        assert!(SessionState::Idle.advance(SessionState::Executing).is_err());
        assert!(SessionState::HandshakeSent
            .advance(SessionState::Completed { success: false })
            .is_ok());
    }
}

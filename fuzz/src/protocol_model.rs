//! Feeds arbitrary control traffic to `ProtocolGate` and arbitrary
//! transitions to `SessionState`, checking both against a plain reference.

use std::sync::Arc;

use proofwire_core::{
    Artifact, ControlMessage, Handshake, ProtocolGate, Role, SessionState, TransportView,
};
use proofwire_transport_shm::{SharedTransport, ShmConfig};

/// One message as the fuzzer picks it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgOp {
    /// Handshake carrying the right view for the gate's role.
    Handshake,
    /// Handshake carrying the other role's view.
    WrongViewHandshake,
    /// Handshake whose id disagrees with its view.
    MismatchedHandshake,
    Exec,
    Flush,
    Shutdown,
}

impl MsgOp {
    pub fn from_raw(tag: u8) -> Self {
        match tag % 6 {
            0 => MsgOp::Handshake,
            1 => MsgOp::WrongViewHandshake,
            2 => MsgOp::MismatchedHandshake,
            3 => MsgOp::Exec,
            4 => MsgOp::Flush,
            _ => MsgOp::Shutdown,
        }
    }
}

fn transport() -> Arc<SharedTransport> {
    SharedTransport::new(&ShmConfig {
        capacity: 8,
        stall_timeout: None,
    })
}

fn view_for(transport: &Arc<SharedTransport>, role: Role) -> TransportView {
    match role {
        Role::Compute => TransportView::Compute(transport.compute_view()),
        Role::Relay => TransportView::Relay(transport.relay_view()),
    }
}

fn other(role: Role) -> Role {
    match role {
        Role::Compute => Role::Relay,
        Role::Relay => Role::Compute,
    }
}

fn build(op: MsgOp, role: Role, transport: &Arc<SharedTransport>) -> ControlMessage {
    let id = transport.session_id();
    match op {
        MsgOp::Handshake => ControlMessage::Handshake(Handshake {
            session_id: id,
            view: view_for(transport, role),
            endpoint: Some("mem://peer".into()),
        }),
        MsgOp::WrongViewHandshake => ControlMessage::Handshake(Handshake {
            session_id: id,
            view: view_for(transport, other(role)),
            endpoint: None,
        }),
        MsgOp::MismatchedHandshake => ControlMessage::Handshake(Handshake {
            session_id: id.wrapping_add(1),
            view: view_for(transport, role),
            endpoint: None,
        }),
        MsgOp::Exec => ControlMessage::Exec {
            artifact: Artifact::new(vec![0u8; 2]),
            witness: r#"{"coordinates":[]}"#.into(),
        },
        MsgOp::Flush => ControlMessage::Flush,
        MsgOp::Shutdown => ControlMessage::Shutdown,
    }
}

/// What the gate should say, given what it accepted before.
fn reference_admits(role: Role, op: MsgOp, attached: bool, executed: bool) -> bool {
    match (attached, op) {
        (false, MsgOp::Handshake) => true,
        (false, _) => false,
        (true, MsgOp::Handshake | MsgOp::WrongViewHandshake | MsgOp::MismatchedHandshake) => false,
        (true, MsgOp::Exec) => role == Role::Compute && !executed,
        (true, MsgOp::Flush | MsgOp::Shutdown) => role == Role::Relay,
    }
}

/// Run `ops` through a fresh gate. Workers stop at the first rejection, so
/// the harness does too.
pub fn execute_and_verify(role: Role, ops: &[MsgOp]) -> Result<(), String> {
    let transport = transport();
    let mut gate = ProtocolGate::new(role);
    let mut attached = false;
    let mut executed = false;

    for (i, op) in ops.iter().enumerate() {
        let want = reference_admits(role, *op, attached, executed);
        let got = gate.admit(&build(*op, role, &transport));

        match (want, &got) {
            (true, Ok(())) => {
                match op {
                    MsgOp::Handshake => attached = true,
                    MsgOp::Exec => executed = true,
                    _ => {}
                }
                if gate.session_id() != Some(transport.session_id()) {
                    return Err(format!("op {}: gate lost its session id", i));
                }
                if gate.has_executed() != executed {
                    return Err(format!("op {}: exec bookkeeping diverged", i));
                }
            }
            (false, Err(_)) => return Ok(()),
            _ => {
                return Err(format!(
                    "op {} ({:?}) as {}: gate said {:?}, expected admit={}",
                    i, op, role, got, want
                ))
            }
        }
    }
    Ok(())
}

const STATES: [SessionState; 5] = [
    SessionState::Idle,
    SessionState::HandshakeSent,
    SessionState::Executing,
    SessionState::Completed { success: true },
    SessionState::Completed { success: false },
];

pub fn state_from_raw(tag: u8) -> SessionState {
    STATES[tag as usize % STATES.len()]
}

fn rank(state: SessionState) -> u8 {
    match state {
        SessionState::Idle => 0,
        SessionState::HandshakeSent => 1,
        SessionState::Executing => 2,
        SessionState::Completed { .. } => 3,
    }
}

/// Attempt every transition in `targets`; accepted ones must only move
/// forward and nothing may leave `Completed`.
pub fn verify_lifecycle(targets: &[SessionState]) -> Result<(), String> {
    let mut state = SessionState::Idle;
    for (i, next) in targets.iter().enumerate() {
        let allowed = match (state, *next) {
            (SessionState::Completed { .. }, _) => false,
            (_, SessionState::Completed { .. }) => true,
            (from, to) => rank(to) == rank(from) + 1,
        };
        match (state.advance(*next), allowed) {
            (Ok(s), true) => {
                if s != *next {
                    return Err(format!("step {}: advanced to {:?}, asked {:?}", i, s, next));
                }
                state = s;
            }
            (Err(_), false) => {}
            (got, _) => {
                return Err(format!(
                    "step {}: {:?} -> {:?} gave {:?}, expected allowed={}",
                    i, state, next, got, allowed
                ))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_sequence() {
        execute_and_verify(Role::Compute, &[MsgOp::Handshake, MsgOp::Exec, MsgOp::Exec]).unwrap();
    }

    #[test]
    fn test_relay_sequence() {
        execute_and_verify(
            Role::Relay,
            &[MsgOp::Handshake, MsgOp::Flush, MsgOp::Flush, MsgOp::Shutdown],
        )
        .unwrap();
    }

    #[test]
    fn test_bad_first_messages() {
        for op in [
            MsgOp::WrongViewHandshake,
            MsgOp::MismatchedHandshake,
            MsgOp::Exec,
            MsgOp::Flush,
        ] {
            execute_and_verify(Role::Compute, &[op]).unwrap();
            execute_and_verify(Role::Relay, &[op]).unwrap();
        }
    }

    #[test]
    fn test_lifecycle_walk() {
        verify_lifecycle(&[
            SessionState::HandshakeSent,
            SessionState::Idle,
            SessionState::Executing,
            SessionState::Completed { success: false },
            SessionState::Executing,
        ])
        .unwrap();
    }
}

//! The compute worker: runs the proof computation on its own OS thread.
//!
//! The computation blocks on ring reads and writes, so it never touches the
//! async executor. Control messages arrive over an unbounded channel read
//! with `blocking_recv`.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use proofwire_core::shm::{ComputeView, RingError};
use proofwire_core::{
    Artifact, Completion, Computation, ControlMessage, Fault, ProofIo, ProtocolGate, Role,
    TransportView, WorkerError, WorkerEvent,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Controller-side handle to a running compute worker.
pub struct ComputeWorker {
    control: UnboundedSender<ControlMessage>,
    thread: thread::JoinHandle<()>,
}

impl ComputeWorker {
    /// Start the worker thread. It waits for a handshake before doing anything.
    pub fn spawn<C: Computation>(
        computation: C,
        events: UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Self> {
        let (control, control_rx) = mpsc::unbounded_channel();
        let span = tracing::Span::current();
        let thread = thread::Builder::new()
            .name("proofwire-compute".into())
            .spawn(move || {
                let _entered = span.enter();
                run(computation, control_rx, events);
            })?;
        Ok(Self { control, thread })
    }

    /// Queue a control message. Returns false once the worker has exited.
    pub fn send(&self, msg: ControlMessage) -> bool {
        self.control.send(msg).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

fn run<C: Computation>(
    mut computation: C,
    mut control: UnboundedReceiver<ControlMessage>,
    events: UnboundedSender<WorkerEvent>,
) {
    let mut gate = ProtocolGate::new(Role::Compute);
    let mut view: Option<ComputeView> = None;

    while let Some(msg) = control.blocking_recv() {
        if let Err(e) = gate.admit(&msg) {
            tracing::warn!(error = %e, "compute worker rejected control message");
            let _ = events.send(WorkerEvent::Violation {
                role: Role::Compute,
                message: e.to_string(),
            });
            return;
        }

        match msg {
            ControlMessage::Handshake(hs) => {
                if let TransportView::Compute(v) = hs.view {
                    view = Some(v);
                }
                tracing::debug!(session_id = hs.session_id, "compute worker attached");
                let _ = events.send(WorkerEvent::Ready {
                    role: Role::Compute,
                    session_id: hs.session_id,
                });
            }
            ControlMessage::Exec { artifact, witness } => {
                // The gate only admits exec after a compute handshake.
                let Some(view) = view.take() else { return };
                let completion = execute(&mut computation, &artifact, &witness, view, &events);
                tracing::info!(
                    success = completion.success,
                    fault = ?completion.fault,
                    "computation finished"
                );
                let _ = events.send(WorkerEvent::Completed(completion));
                return;
            }
            ControlMessage::Flush | ControlMessage::Shutdown => {}
        }
    }

    tracing::debug!("compute worker control channel closed");
}

fn execute<C: Computation>(
    computation: &mut C,
    artifact: &Artifact,
    witness: &str,
    view: ComputeView,
    events: &UnboundedSender<WorkerEvent>,
) -> Completion {
    tracing::debug!(artifact = artifact.len(), witness = witness.len(), "running computation");
    let mut io = ProofIo::new(view, events.clone());
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        computation.execute(artifact, witness, &mut io)
    }));

    match result {
        Ok(result) => completion_for(result),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Completion::faulted(Fault::Aborted(format!("computation panicked: {reason}")))
        }
    }
}

/// Map a computation's result to the report sent to the controller.
pub(crate) fn completion_for(result: Result<String, WorkerError>) -> Completion {
    match result {
        Ok(diagnostic) => Completion::from_diagnostic(diagnostic),
        Err(WorkerError::Ring(e @ RingError::Overflow { .. })) => {
            Completion::faulted(Fault::Overflow(e.to_string()))
        }
        Err(WorkerError::Ring(RingError::Closed)) => Completion::faulted(Fault::Transport(
            "shared transport closed mid-computation".into(),
        )),
        Err(WorkerError::Link(e)) => Completion::faulted(Fault::Transport(e.to_string())),
        Err(WorkerError::Protocol(e)) => Completion::faulted(Fault::Protocol(e.to_string())),
        Err(e @ WorkerError::Aborted(_)) => Completion::faulted(Fault::Aborted(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwire_core::shm::{SharedTransport, ShmConfig};
    use proofwire_core::{Handshake, LinkError};

    fn transport() -> std::sync::Arc<SharedTransport> {
        SharedTransport::new(&ShmConfig {
            capacity: 64,
            stall_timeout: None,
        })
    }

    fn handshake(t: &std::sync::Arc<SharedTransport>) -> ControlMessage {
        ControlMessage::Handshake(Handshake {
            session_id: t.session_id(),
            view: TransportView::Compute(t.compute_view()),
            endpoint: None,
        })
    }

    fn exec() -> ControlMessage {
        ControlMessage::Exec {
            artifact: Artifact::new(vec![1u8, 2, 3]),
            witness: r#"{"coordinates":[]}"#.into(),
        }
    }

    #[test]
    fn test_completion_mapping() {
        assert!(completion_for(Ok(String::new())).success);

        let rejected = completion_for(Ok("bad path".into()));
        assert!(!rejected.success);
        assert_eq!(rejected.message.as_deref(), Some("bad path"));
        assert_eq!(rejected.fault, None);

        let overflow = completion_for(Err(WorkerError::Ring(RingError::Overflow {
            capacity: 4,
            pending: 4,
            attempted: 1,
        })));
        assert!(matches!(overflow.fault, Some(Fault::Overflow(_))));

        let closed = completion_for(Err(WorkerError::Ring(RingError::Closed)));
        assert!(matches!(closed.fault, Some(Fault::Transport(_))));

        let link = completion_for(Err(WorkerError::Link(LinkError::PeerClosed)));
        assert!(matches!(link.fault, Some(Fault::Transport(_))));
    }

    #[test]
    fn test_handshake_then_exec() {
        let t = transport();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = ComputeWorker::spawn(
            |_: &Artifact, witness: &str, io: &mut ProofIo| -> Result<String, WorkerError> {
                io.write_bytes(witness.as_bytes())?;
                io.flush();
                Ok(String::new())
            },
            events_tx,
        )
        .unwrap();

        assert!(worker.send(handshake(&t)));
        assert!(worker.send(exec()));

        assert_eq!(
            events.blocking_recv(),
            Some(WorkerEvent::Ready {
                role: Role::Compute,
                session_id: t.session_id()
            })
        );
        assert_eq!(events.blocking_recv(), Some(WorkerEvent::Flush));
        match events.blocking_recv() {
            Some(WorkerEvent::Completed(c)) => assert!(c.success),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(t.outbound().len(), r#"{"coordinates":[]}"#.len());
    }

    #[test]
    fn test_exec_before_handshake_is_a_violation() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = ComputeWorker::spawn(
            |_: &Artifact, _: &str, _: &mut ProofIo| -> Result<String, WorkerError> {
                Ok(String::new())
            },
            events_tx,
        )
        .unwrap();

        worker.send(exec());
        match events.blocking_recv() {
            Some(WorkerEvent::Violation { role, .. }) => assert_eq!(role, Role::Compute),
            other => panic!("expected violation, got {other:?}"),
        }
        assert_eq!(events.blocking_recv(), None);
    }

    #[test]
    fn test_panicking_computation_is_reported() {
        let t = transport();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = ComputeWorker::spawn(
            |_: &Artifact, _: &str, _: &mut ProofIo| -> Result<String, WorkerError> {
                panic!("constraint system exploded")
            },
            events_tx,
        )
        .unwrap();

        worker.send(handshake(&t));
        worker.send(exec());
        let _ready = events.blocking_recv();
        match events.blocking_recv() {
            Some(WorkerEvent::Completed(c)) => {
                assert!(!c.success);
                assert!(matches!(c.fault, Some(Fault::Aborted(_))));
                assert!(c.message.unwrap().contains("constraint system exploded"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }
}

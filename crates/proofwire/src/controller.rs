//! The controller: owns a session's buffers and workers and decides how it ends.
//!
//! ```text
//!              ┌──────────── ProofSession (caller) ────────────┐
//!              │  progress: watch<f64>   done: watch<bool>     │
//!              │  status: watch<Option<SessionReport>>         │
//!              └───────────────────────▲───────────────────────┘
//!                                      │
//!                              supervisor task
//!                  control ▼ ▲ events          control ▼ ▲ events
//!              compute thread                    relay task ◄──► peer
//!                      └──── Arc<SharedTransport> ────┘
//! ```
//!
//! Workers report; only the supervisor decides. Every session gets fresh
//! buffers and fresh workers, and a finished session is never reused.

use std::sync::Arc;
use std::time::{Duration, Instant};

use proofwire_core::shm::SharedTransport;
use proofwire_core::{
    Artifact, Computation, Connector, ControlMessage, Handshake, Path, ProtocolError, Role,
    SessionState, TransportView, WorkerEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::{SessionConfig, MIN_INTERVAL};
use crate::outcome::{Outcome, SessionError, SessionReport};
use crate::progress::ProgressReporter;
use crate::worker::{ComputeWorker, RelayWorker};

/// Starts proof sessions against one peer.
pub struct ProofController<C> {
    config: SessionConfig,
    connector: Arc<C>,
}

impl<C: Connector> ProofController<C> {
    pub fn new(config: SessionConfig, connector: C) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Allocate buffers, spawn both workers and start the session.
    ///
    /// Must be called from within a tokio runtime. The path is encoded up
    /// front so a bad witness never starts any worker.
    pub fn start<P: Computation>(
        &self,
        artifact: Artifact,
        path: &Path,
        computation: P,
    ) -> Result<ProofSession, SessionError> {
        let witness = path.to_witness()?;
        self.launch(artifact, witness, path.len(), computation, mpsc::unbounded_channel())
    }

    /// Spawn the workers and the supervisor around an events channel.
    fn launch<P: Computation>(
        &self,
        artifact: Artifact,
        witness: String,
        points: usize,
        computation: P,
        (events_tx, events_rx): (
            mpsc::UnboundedSender<WorkerEvent>,
            mpsc::UnboundedReceiver<WorkerEvent>,
        ),
    ) -> Result<ProofSession, SessionError> {
        let mut shm = self.config.shm.clone();
        shm.capacity = shm.capacity.max(1);
        let transport = SharedTransport::new(&shm);
        let session_id = transport.session_id();

        let span = tracing::info_span!("session", session_id);
        let _entered = span.enter();
        tracing::info!(
            endpoint = %self.config.endpoint,
            capacity = self.config.shm.capacity,
            points,
            "starting proof session"
        );

        let compute = ComputeWorker::spawn(computation, events_tx.clone())?;
        let relay = RelayWorker::spawn(
            self.connector.clone(),
            self.config.relay.clone(),
            events_tx,
        );

        let (progress_tx, progress) = watch::channel(0.0);
        let (done_tx, done) = watch::channel(false);
        let (status_tx, status) = watch::channel(None);
        let (state_tx, state) = watch::channel(SessionState::Idle);

        let supervisor = Supervisor {
            session_id,
            config: self.config.clone(),
            transport: transport.clone(),
            compute,
            relay,
            exec: Some(ControlMessage::Exec { artifact, witness }),
            ready: [false; 2],
            state: SessionState::Idle,
            state_tx,
            progress: ProgressReporter::new(
                transport.clone(),
                self.config.expected_total,
                progress_tx,
            ),
            done_tx,
            status_tx,
            started: Instant::now(),
        };
        let task = tokio::spawn(supervisor.run(events_rx).instrument(span.clone()));

        Ok(ProofSession {
            session_id,
            transport,
            progress,
            done,
            status,
            state,
            task,
        })
    }

    /// Start a session and wait for its report.
    pub async fn run<P: Computation>(
        &self,
        artifact: Artifact,
        path: &Path,
        computation: P,
    ) -> Result<SessionReport, SessionError> {
        self.start(artifact, path, computation)?.wait().await
    }
}

/// A running (or finished) proof session, as seen by its caller.
pub struct ProofSession {
    session_id: u64,
    transport: Arc<SharedTransport>,
    progress: watch::Receiver<f64>,
    done: watch::Receiver<bool>,
    status: watch::Receiver<Option<SessionReport>>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionReport>,
}

impl ProofSession {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn transport(&self) -> &Arc<SharedTransport> {
        &self.transport
    }

    /// Progress in `[0, 100]`, published every poll interval.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Flips to `true` exactly once, after the status is published.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    /// The final report, once there is one.
    pub fn status(&self) -> watch::Receiver<Option<SessionReport>> {
        self.status.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the session to end.
    pub async fn wait(self) -> Result<SessionReport, SessionError> {
        self.task
            .await
            .map_err(|e| SessionError::Supervisor(e.to_string()))
    }
}

struct Supervisor {
    session_id: u64,
    config: SessionConfig,
    transport: Arc<SharedTransport>,
    compute: ComputeWorker,
    relay: RelayWorker,
    exec: Option<ControlMessage>,
    /// Indexed by [`role_index`].
    ready: [bool; 2],
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    progress: ProgressReporter,
    done_tx: watch::Sender<bool>,
    status_tx: watch::Sender<Option<SessionReport>>,
    started: Instant,
}

fn role_index(role: Role) -> usize {
    match role {
        Role::Compute => 0,
        Role::Relay => 1,
    }
}

impl Supervisor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) -> SessionReport {
        self.send_handshakes();

        let mut poll = tokio::time::interval(self.config.poll_interval.max(MIN_INTERVAL));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = self.config.session_timeout;
        let expiry = async move {
            match timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        let outcome = loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break Outcome::ProtocolViolation {
                            message: "workers exited without reporting".into(),
                        };
                    };
                    if let Some(outcome) = self.handle(event) {
                        break outcome;
                    }
                }
                _ = poll.tick() => {
                    self.progress.sample();
                }
                _ = &mut expiry => {
                    let after = timeout.unwrap_or_default();
                    tracing::warn!(?after, "session timed out");
                    break Outcome::TimedOut { after };
                }
            }
        };

        self.finish(outcome).await
    }

    fn send_handshakes(&mut self) {
        let compute = Handshake {
            session_id: self.session_id,
            view: TransportView::Compute(self.transport.compute_view()),
            endpoint: None,
        };
        let relay = Handshake {
            session_id: self.session_id,
            view: TransportView::Relay(self.transport.relay_view()),
            endpoint: Some(self.config.endpoint.clone()),
        };
        self.compute.send(ControlMessage::Handshake(compute));
        self.relay.send(ControlMessage::Handshake(relay));
        self.transition(SessionState::HandshakeSent);
    }

    /// Apply one worker event; `Some` ends the session.
    fn handle(&mut self, event: WorkerEvent) -> Option<Outcome> {
        match event {
            WorkerEvent::Ready { role, session_id } => {
                if session_id != self.session_id {
                    let err = ProtocolError::SessionMismatch {
                        role,
                        expected: self.session_id,
                        actual: session_id,
                    };
                    return Some(Outcome::ProtocolViolation {
                        message: err.to_string(),
                    });
                }
                tracing::debug!(%role, "worker ready");
                self.ready[role_index(role)] = true;
                if self.ready.iter().all(|r| *r) {
                    if let Some(exec) = self.exec.take() {
                        if !self.compute.send(exec) {
                            return Some(Outcome::ProtocolViolation {
                                message: ProtocolError::WorkerGone {
                                    role: Role::Compute,
                                }
                                .to_string(),
                            });
                        }
                        self.transition(SessionState::Executing);
                    }
                }
                None
            }
            WorkerEvent::Flush => {
                self.relay.send(ControlMessage::Flush);
                None
            }
            WorkerEvent::Completed(completion) => Some(Outcome::from_completion(completion)),
            WorkerEvent::RelayFailed(fault) => Some(Outcome::from_fault(fault)),
            WorkerEvent::Violation { role, message } => Some(Outcome::ProtocolViolation {
                message: format!("{role} worker: {message}"),
            }),
        }
    }

    fn transition(&mut self, next: SessionState) {
        match self.state.advance(next) {
            Ok(state) => {
                tracing::debug!(from = self.state.name(), to = state.name(), "session state");
                self.state = state;
                self.state_tx.send_replace(state);
            }
            Err(e) => tracing::error!(error = %e, "refused state transition"),
        }
    }

    async fn finish(mut self, outcome: Outcome) -> SessionReport {
        let graceful = matches!(outcome, Outcome::Accepted | Outcome::Rejected { .. });
        if graceful {
            self.relay.send(ControlMessage::Shutdown);
        } else {
            // Wakes a compute thread blocked on either ring.
            self.transport.close();
            self.relay.abort();
        }
        self.relay.join(self.config.shutdown_grace).await;
        self.transport.close();
        if !self.compute.is_finished() {
            tracing::debug!("compute thread still unwinding, detaching");
        }

        let elapsed = self.started.elapsed();
        let progress = self.progress.sample();
        self.transition(SessionState::Completed {
            success: outcome.is_success(),
        });

        let report = SessionReport {
            session_id: self.session_id,
            outcome,
            elapsed,
            bytes_transferred: self.progress.bytes(),
            progress,
        };
        tracing::info!(
            outcome = %report.outcome,
            elapsed = ?round_millis(elapsed),
            bytes = report.bytes_transferred,
            "session finished"
        );
        self.status_tx.send_replace(Some(report.clone()));
        self.done_tx.send_replace(true);
        report
    }
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

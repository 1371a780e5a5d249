//! The relay worker: moves bytes between the rings and the peer link.
//!
//! Runs as a tokio task and only uses the non-blocking ring operations.
//! Outbound bytes leave on a flush (exactly what was pending when the flush
//! arrived), on a tick once a batch has built up, or on a tick after the
//! compute worker has gone quiet. Inbound bytes go straight into the inbound
//! ring; anything that does not fit is an overflow.

use std::sync::Arc;

use proofwire_core::shm::{RelayView, RingError};
use proofwire_core::{
    Connector, ControlMessage, Fault, LinkRx, LinkTx, PeerLink, ProtocolGate, Role,
    TransportView, WorkerEvent,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::{RelayConfig, MIN_INTERVAL};

/// Controller-side handle to a running relay worker.
pub struct RelayWorker {
    control: UnboundedSender<ControlMessage>,
    task: JoinHandle<()>,
}

impl RelayWorker {
    pub fn spawn<C: Connector>(
        connector: Arc<C>,
        config: RelayConfig,
        events: UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            run(connector, config, control_rx, events).instrument(tracing::Span::current()),
        );
        Self { control, task }
    }

    /// Queue a control message. Returns false once the worker has exited.
    pub fn send(&self, msg: ControlMessage) -> bool {
        self.control.send(msg).is_ok()
    }

    /// Wait for the task to finish, or abort it after `grace`.
    pub async fn join(&mut self, grace: std::time::Duration) {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            tracing::warn!(?grace, "relay did not stop in time, aborting");
            self.task.abort();
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run<C: Connector>(
    connector: Arc<C>,
    config: RelayConfig,
    mut control: UnboundedReceiver<ControlMessage>,
    events: UnboundedSender<WorkerEvent>,
) {
    let mut gate = ProtocolGate::new(Role::Relay);

    let Some(first) = control.recv().await else {
        return;
    };
    if let Err(e) = gate.admit(&first) {
        report_violation(&events, e.to_string());
        return;
    }
    let ControlMessage::Handshake(hs) = first else {
        return;
    };
    let TransportView::Relay(view) = hs.view else {
        return;
    };
    let Some(endpoint) = hs.endpoint.filter(|e| !e.is_empty()) else {
        let _ = events.send(WorkerEvent::RelayFailed(Fault::Transport(
            "relay handshake carried no endpoint".into(),
        )));
        return;
    };

    let link = match connector.connect(&endpoint).await {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(%endpoint, error = %e, "relay could not reach peer");
            let _ = events.send(WorkerEvent::RelayFailed(Fault::Transport(e.to_string())));
            return;
        }
    };
    tracing::info!(%endpoint, session_id = hs.session_id, "relay connected");
    let _ = events.send(WorkerEvent::Ready {
        role: Role::Relay,
        session_id: hs.session_id,
    });

    let (tx, rx) = link.split();
    // Dropping the set aborts the downlink, so the receive half never
    // outlives this task, even when the controller aborts it.
    let mut downlink_task = JoinSet::new();
    downlink_task.spawn(downlink(rx, view.clone()).in_current_span());

    let result = uplink(tx, &view, &config, &mut gate, &mut control, &mut downlink_task).await;
    downlink_task.shutdown().await;
    match result {
        Ok(()) => tracing::debug!("relay stopped"),
        Err(Stop::Violation(message)) => report_violation(&events, message),
        Err(Stop::Fault(fault)) => {
            tracing::warn!(?fault, "relay failed");
            let _ = events.send(WorkerEvent::RelayFailed(fault));
        }
    }
}

enum Stop {
    Violation(String),
    Fault(Fault),
}

fn report_violation(events: &UnboundedSender<WorkerEvent>, message: String) {
    tracing::warn!(%message, "relay worker rejected control message");
    let _ = events.send(WorkerEvent::Violation {
        role: Role::Relay,
        message,
    });
}

async fn uplink<T: LinkTx>(
    mut tx: T,
    view: &RelayView,
    config: &RelayConfig,
    gate: &mut ProtocolGate,
    control: &mut UnboundedReceiver<ControlMessage>,
    downlink: &mut JoinSet<Result<(), Fault>>,
) -> Result<(), Stop> {
    let mut tick = tokio::time::interval(config.drain_interval.max(MIN_INTERVAL));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_written = view.outbound_written();
    let mut downlink_done = false;

    let result = loop {
        tokio::select! {
            msg = control.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!("controller went away");
                    break Ok(());
                };
                if let Err(e) = gate.admit(&msg) {
                    break Err(Stop::Violation(e.to_string()));
                }
                match msg {
                    ControlMessage::Flush => {
                        let pending = view.pending_outbound();
                        if let Err(fault) = forward(&mut tx, view, pending, config).await {
                            break Err(Stop::Fault(fault));
                        }
                    }
                    ControlMessage::Shutdown => {
                        let pending = view.pending_outbound();
                        let drained = forward(&mut tx, view, pending, config).await;
                        break drained.map_err(Stop::Fault);
                    }
                    ControlMessage::Handshake(_) | ControlMessage::Exec { .. } => {}
                }
            }
            _ = tick.tick() => {
                let written = view.outbound_written();
                let pending = view.pending_outbound();
                let quiet = written == last_written;
                last_written = written;
                if pending > 0 && (pending >= config.batch_threshold || quiet) {
                    if let Err(fault) = forward(&mut tx, view, pending, config).await {
                        break Err(Stop::Fault(fault));
                    }
                }
            }
            joined = downlink.join_next(), if !downlink_done => {
                downlink_done = true;
                match joined {
                    None | Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(fault))) => break Err(Stop::Fault(fault)),
                    Some(Err(e)) => break Err(Stop::Fault(Fault::Transport(format!("downlink task: {e}")))),
                }
            }
        }
    };

    if let Err(e) = tx.close().await {
        tracing::debug!(error = %e, "closing peer link");
    }
    result
}

/// Send up to `limit` outbound bytes, in order, in chunks.
async fn forward<T: LinkTx>(
    tx: &mut T,
    view: &RelayView,
    limit: usize,
    config: &RelayConfig,
) -> Result<(), Fault> {
    let mut remaining = limit;
    while remaining > 0 {
        let chunk = match view.drain_outbound(remaining.min(config.max_send_chunk)) {
            Ok(chunk) => chunk,
            // Torn down under us; the controller already knows.
            Err(RingError::Closed) => return Ok(()),
            Err(e) => return Err(Fault::Overflow(e.to_string())),
        };
        if chunk.is_empty() {
            break;
        }
        let n = chunk.len();
        let total = view.record_transfer(n);
        tx.send(chunk)
            .await
            .map_err(|e| Fault::Transport(e.to_string()))?;
        tracing::trace!(sent = n, total, "forwarded outbound bytes");
        remaining -= n;
    }
    Ok(())
}

async fn downlink<R: LinkRx>(mut rx: R, view: RelayView) -> Result<(), Fault> {
    loop {
        match rx.recv().await {
            Ok(Some(bytes)) => {
                // Counted before the compute worker can see them.
                let total = view.record_transfer(bytes.len());
                view.feed_inbound(&bytes).map_err(|e| match e {
                    RingError::Overflow { .. } => Fault::Overflow(e.to_string()),
                    RingError::Closed => Fault::Transport(e.to_string()),
                })?;
                tracing::trace!(received = bytes.len(), total, "fed inbound bytes");
            }
            Ok(None) => {
                tracing::debug!("peer closed its side");
                view.close_inbound();
                return Ok(());
            }
            Err(e) => {
                view.close_inbound();
                return Err(Fault::Transport(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwire_core::shm::{SharedTransport, ShmConfig};
    use proofwire_core::{Handshake, LinkError, StreamLink};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Hands out a pre-built link once.
    struct OneShot(parking_lot::Mutex<Option<StreamLink<DuplexStream>>>);

    impl Connector for OneShot {
        type Link = StreamLink<DuplexStream>;

        async fn connect(&self, endpoint: &str) -> Result<Self::Link, LinkError> {
            self.0.lock().take().ok_or_else(|| LinkError::Connect {
                endpoint: endpoint.to_string(),
                reason: "already used".into(),
            })
        }
    }

    fn setup(
        capacity: usize,
        config: RelayConfig,
    ) -> (
        Arc<SharedTransport>,
        RelayWorker,
        UnboundedReceiver<WorkerEvent>,
        StreamLink<DuplexStream>,
    ) {
        let transport = SharedTransport::new(&ShmConfig {
            capacity,
            stall_timeout: None,
        });
        let (ours, theirs) = StreamLink::pair();
        let (events_tx, events) = mpsc::unbounded_channel();
        let relay = RelayWorker::spawn(
            Arc::new(OneShot(parking_lot::Mutex::new(Some(ours)))),
            config,
            events_tx,
        );
        relay.send(ControlMessage::Handshake(Handshake {
            session_id: transport.session_id(),
            view: TransportView::Relay(transport.relay_view()),
            endpoint: Some("mem://peer".into()),
        }));
        (transport, relay, events, theirs)
    }

    fn slow_ticks() -> RelayConfig {
        RelayConfig {
            drain_interval: Duration::from_secs(3600),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn test_flush_sends_pending_bytes() {
        let (transport, relay, mut events, peer) = setup(1024, slow_ticks());
        let (_peer_tx, mut peer_rx) = peer.split();
        assert!(matches!(
            events.recv().await,
            Some(WorkerEvent::Ready { role: Role::Relay, .. })
        ));

        transport.compute_view().write_bytes(b"hello").unwrap();
        relay.send(ControlMessage::Flush);

        let mut got = Vec::new();
        while got.len() < 5 {
            got.extend(peer_rx.recv().await.unwrap().unwrap());
        }
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn test_inbound_bytes_reach_the_ring() {
        let (transport, _relay, mut events, peer) = setup(1024, slow_ticks());
        let (mut peer_tx, _peer_rx) = peer.split();
        let _ready = events.recv().await;

        peer_tx.send(b"abc".to_vec()).await.unwrap();
        let compute = transport.compute_view();
        let got = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 3];
            compute.read_exact(&mut buf).map(|()| buf)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&got, b"abc");
        // Counted before the compute side could read them.
        assert_eq!(transport.progress().load(), 3);
    }

    #[tokio::test]
    async fn test_abort_releases_peer_link() {
        let (_transport, relay, mut events, peer) = setup(1024, slow_ticks());
        let (_peer_tx, mut peer_rx) = peer.split();
        let _ready = events.recv().await;

        relay.abort();
        let next = tokio::time::timeout(Duration::from_secs(3), peer_rx.recv())
            .await
            .expect("link still open after abort");
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_shutdown_releases_peer_link() {
        let (transport, mut relay, mut events, peer) = setup(1024, slow_ticks());
        let (_peer_tx, mut peer_rx) = peer.split();
        let _ready = events.recv().await;

        transport.compute_view().write_bytes(b"bye").unwrap();
        relay.send(ControlMessage::Shutdown);
        relay.join(Duration::from_secs(3)).await;

        let mut got = Vec::new();
        while let Some(chunk) = peer_rx.recv().await.unwrap() {
            got.extend(chunk);
        }
        assert_eq!(got, b"bye");
    }

    #[tokio::test]
    async fn test_inbound_overflow_is_reported() {
        let (_transport, _relay, mut events, peer) = setup(4, slow_ticks());
        let (mut peer_tx, _peer_rx) = peer.split();
        let _ready = events.recv().await;

        peer_tx.send(vec![7u8; 16]).await.unwrap();
        match events.recv().await {
            Some(WorkerEvent::RelayFailed(Fault::Overflow(_))) => {}
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quiet_producer_is_drained_on_tick() {
        let config = RelayConfig {
            drain_interval: Duration::from_millis(5),
            ..RelayConfig::default()
        };
        let (transport, _relay, mut events, peer) = setup(1024, config);
        let (_peer_tx, mut peer_rx) = peer.split();
        let _ready = events.recv().await;

        transport.compute_view().write_bytes(b"tick").unwrap();
        let mut got = Vec::new();
        while got.len() < 4 {
            got.extend(peer_rx.recv().await.unwrap().unwrap());
        }
        assert_eq!(got, b"tick");
    }

    #[tokio::test]
    async fn test_exec_is_a_violation_for_relay() {
        let (_transport, relay, mut events, _peer) = setup(64, slow_ticks());
        let _ready = events.recv().await;

        relay.send(ControlMessage::Exec {
            artifact: proofwire_core::Artifact::new(vec![0u8]),
            witness: String::new(),
        });
        match events.recv().await {
            Some(WorkerEvent::Violation { role, .. }) => assert_eq!(role, Role::Relay),
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_peer_fails_relay() {
        let transport = SharedTransport::new(&ShmConfig {
            capacity: 64,
            stall_timeout: None,
        });
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let relay = RelayWorker::spawn(
            Arc::new(OneShot(parking_lot::Mutex::new(None))),
            RelayConfig::default(),
            events_tx,
        );
        relay.send(ControlMessage::Handshake(Handshake {
            session_id: transport.session_id(),
            view: TransportView::Relay(transport.relay_view()),
            endpoint: Some("mem://nowhere".into()),
        }));
        assert!(matches!(
            events.recv().await,
            Some(WorkerEvent::RelayFailed(Fault::Transport(_)))
        ));
    }
}

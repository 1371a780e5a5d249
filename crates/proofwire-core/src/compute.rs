//! The seam between the compute worker and the proof computation it runs.

use proofwire_transport_shm::{ComputeView, RingError};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::WorkerError;
use crate::protocol::{Artifact, WorkerEvent};

/// The byte-stream API a computation sees while it runs.
///
/// Reads and writes block the calling thread; computations run on the
/// compute worker's own thread, never on the async executor.
pub struct ProofIo {
    view: ComputeView,
    events: UnboundedSender<WorkerEvent>,
    flushes: u64,
}

impl ProofIo {
    pub fn new(view: ComputeView, events: UnboundedSender<WorkerEvent>) -> Self {
        Self {
            view,
            events,
            flushes: 0,
        }
    }

    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, RingError> {
        self.view.read_byte()
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RingError> {
        self.view.read_exact(buf)
    }

    #[inline]
    pub fn write_byte(&mut self, value: u8) -> Result<(), RingError> {
        self.view.write_byte(value)
    }

    /// Write `bytes` as one contiguous run under the transport's write lock.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RingError> {
        self.view.write_bytes(bytes)
    }

    /// Ask the relay to transmit what has been written so far.
    ///
    /// A hint: the relay also drains on its own schedule.
    pub fn flush(&mut self) {
        self.flushes += 1;
        tracing::trace!(pending = self.view.pending_outbound(), "flush requested");
        // The controller being gone means the session is over; the next
        // ring operation reports it.
        let _ = self.events.send(WorkerEvent::Flush);
    }

    /// Number of flushes requested so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn session_id(&self) -> u64 {
        self.view.session_id()
    }
}

/// An opaque proof computation.
///
/// Returns the diagnostic text: empty when every check passed, otherwise the
/// check that failed. Transport problems surface as `Err`.
pub trait Computation: Send + 'static {
    fn execute(
        &mut self,
        artifact: &Artifact,
        witness: &str,
        io: &mut ProofIo,
    ) -> Result<String, WorkerError>;
}

impl<F> Computation for F
where
    F: FnMut(&Artifact, &str, &mut ProofIo) -> Result<String, WorkerError> + Send + 'static,
{
    fn execute(
        &mut self,
        artifact: &Artifact,
        witness: &str,
        io: &mut ProofIo,
    ) -> Result<String, WorkerError> {
        self(artifact, witness, io)
    }
}

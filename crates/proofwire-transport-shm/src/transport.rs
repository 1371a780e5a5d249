//! The shared transport: two rings, a write lock and a progress counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::lock::{WriteGuard, WriteLock};
use crate::progress::ProgressCounter;
use crate::ring::{RingBuffer, RingError, DEFAULT_RING_CAPACITY, DEFAULT_STALL_TIMEOUT};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocation parameters for a [`SharedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmConfig {
    /// Capacity of each ring, in bytes.
    pub capacity: usize,
    /// How long a blocking write may wait on a full outbound ring.
    pub stall_timeout: Option<Duration>,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
        }
    }
}

/// Memory shared by the compute worker and the relay worker for one session.
///
/// The controller allocates it and hands out [`ComputeView`] / [`RelayView`];
/// a transport is never reused once its session ends.
#[derive(Debug)]
pub struct SharedTransport {
    session_id: u64,
    /// Network to compute.
    inbound: RingBuffer,
    /// Compute to network.
    outbound: RingBuffer,
    write_lock: WriteLock,
    progress: ProgressCounter,
}

impl SharedTransport {
    /// Allocate fresh rings with zeroed cursors and a new session id.
    pub fn new(config: &ShmConfig) -> Arc<Self> {
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            session_id,
            capacity = config.capacity,
            "allocating shared transport"
        );
        Arc::new(Self {
            session_id,
            inbound: RingBuffer::with_stall_timeout(config.capacity, config.stall_timeout),
            outbound: RingBuffer::with_stall_timeout(config.capacity, config.stall_timeout),
            write_lock: WriteLock::new(),
            progress: ProgressCounter::new(),
        })
    }

    /// Identity of these buffers; both workers must agree on it.
    #[inline]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    #[inline]
    pub fn inbound(&self) -> &RingBuffer {
        &self.inbound
    }

    #[inline]
    pub fn outbound(&self) -> &RingBuffer {
        &self.outbound
    }

    #[inline]
    pub fn progress(&self) -> &ProgressCounter {
        &self.progress
    }

    /// Take the write lock for a multi-byte write into the outbound ring.
    pub fn acquire_write_lock(&self) -> WriteGuard<'_> {
        self.write_lock.acquire()
    }

    #[inline]
    pub fn write_lock(&self) -> &WriteLock {
        &self.write_lock
    }

    /// Close both rings, waking every blocked reader and writer.
    pub fn close(&self) {
        tracing::debug!(session_id = self.session_id, "closing shared transport");
        self.inbound.close();
        self.outbound.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed() && self.outbound.is_closed()
    }

    pub fn compute_view(self: &Arc<Self>) -> ComputeView {
        ComputeView {
            transport: self.clone(),
        }
    }

    pub fn relay_view(self: &Arc<Self>) -> RelayView {
        RelayView {
            transport: self.clone(),
        }
    }
}

/// The compute worker's side: reads inbound, writes outbound.
#[derive(Debug, Clone)]
pub struct ComputeView {
    transport: Arc<SharedTransport>,
}

impl ComputeView {
    #[inline]
    pub fn session_id(&self) -> u64 {
        self.transport.session_id
    }

    /// Block until a byte from the peer is available.
    #[inline]
    pub fn read_byte(&self) -> Result<u8, RingError> {
        self.transport.inbound.read_byte()
    }

    /// Fill `buf` from the inbound ring, blocking as needed.
    pub fn read_exact(&self, buf: &mut [u8]) -> Result<(), RingError> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    /// Write a single byte. Not serialized against [`Self::write_bytes`].
    #[inline]
    pub fn write_byte(&self, value: u8) -> Result<(), RingError> {
        self.transport.outbound.write_byte(value)
    }

    /// Write `bytes` contiguously: no other `write_bytes` call interleaves.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), RingError> {
        let _guard = self.transport.acquire_write_lock();
        self.transport.outbound.write_slice(bytes)
    }

    /// Bytes written but not yet picked up by the relay.
    pub fn pending_outbound(&self) -> usize {
        self.transport.outbound.len()
    }
}

/// The relay worker's side: drains outbound, feeds inbound.
///
/// Every operation is non-blocking so it can run on an async executor.
#[derive(Debug, Clone)]
pub struct RelayView {
    transport: Arc<SharedTransport>,
}

impl RelayView {
    #[inline]
    pub fn session_id(&self) -> u64 {
        self.transport.session_id
    }

    /// Bytes currently waiting in the outbound ring.
    #[inline]
    pub fn pending_outbound(&self) -> usize {
        self.transport.outbound.len()
    }

    /// Total bytes the compute worker has ever written outbound.
    ///
    /// Unchanged between two looks means the producer has gone quiet.
    #[inline]
    pub fn outbound_written(&self) -> u64 {
        self.transport.outbound.write_cursor()
    }

    /// Take up to `max` outbound bytes, in write order.
    pub fn drain_outbound(&self, max: usize) -> Result<Vec<u8>, RingError> {
        self.transport.outbound.read_available(max)
    }

    /// Hand bytes received from the network to the compute worker.
    ///
    /// There is no flow control: bytes that do not fit are an overflow.
    pub fn feed_inbound(&self, bytes: &[u8]) -> Result<(), RingError> {
        self.transport.inbound.try_write_slice(bytes)
    }

    /// No more bytes will arrive from the peer.
    ///
    /// The compute worker can still read what is buffered.
    pub fn close_inbound(&self) {
        self.transport.inbound.close();
    }

    /// Record bytes forwarded to or from the network.
    pub fn record_transfer(&self, n: usize) -> u64 {
        self.transport.progress.add(n as u64)
    }

    #[inline]
    pub fn progress(&self) -> &ProgressCounter {
        &self.transport.progress
    }
}

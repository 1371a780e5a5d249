//! SPSC byte ring shared between exactly one producer and one consumer.
//!
//! The cursors live outside the byte array and only ever grow:
//!
//! - `last` is advanced by the producer after the byte is stored.
//! - `first` is advanced by the consumer after the byte is loaded.
//!
//! `last - first` is the number of unread bytes and never exceeds
//! `capacity`. The slot for a cursor is `cursor % capacity`.

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Capacity used by the reference deployment for each direction (20 MB).
pub const DEFAULT_RING_CAPACITY: usize = 20_000_000;

/// How long a blocking write may stay stuck on a full ring before the
/// overflow is reported.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors reported by ring operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// The producer tried to advance past unread data.
    #[error("ring overflow: {attempted} byte(s) do not fit ({pending} of {capacity} unread)")]
    Overflow {
        capacity: usize,
        pending: usize,
        attempted: usize,
    },

    /// The ring was closed; no more bytes will be produced or consumed.
    #[error("ring closed")]
    Closed,
}

/// Fixed-capacity byte ring.
pub struct RingBuffer {
    data: Box<[AtomicU8]>,
    /// Consumer cursor.
    first: AtomicU64,
    /// Producer cursor.
    last: AtomicU64,
    closed: AtomicBool,
    stall_timeout: Option<Duration>,
    /// Number of threads parked (or about to park) on `wake`.
    sleepers: AtomicUsize,
    gate: Mutex<()>,
    wake: Condvar,
}

impl RingBuffer {
    /// Allocate a ring with the default stall timeout.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_stall_timeout(capacity, Some(DEFAULT_STALL_TIMEOUT))
    }

    /// Allocate a ring. `None` makes blocking writes wait forever.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_stall_timeout(capacity: usize, stall_timeout: Option<Duration>) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            data: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            first: AtomicU64::new(0),
            last: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stall_timeout,
            sleepers: AtomicUsize::new(0),
            gate: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        let first = self.first.load(Ordering::Acquire);
        let last = self.last.load(Ordering::Acquire);
        last.saturating_sub(first) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space from the producer's point of view.
    #[inline]
    fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    fn slot(&self, cursor: u64) -> &AtomicU8 {
        &self.data[(cursor % self.data.len() as u64) as usize]
    }

    /// Producer cursor (total bytes ever written).
    pub fn write_cursor(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Consumer cursor (total bytes ever read).
    pub fn read_cursor(&self) -> u64 {
        self.first.load(Ordering::Acquire)
    }

    /// Close the ring and wake every blocked reader and writer.
    ///
    /// Bytes already buffered can still be read; afterwards reads fail with
    /// [`RingError::Closed`]. Writes fail immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _gate = self.gate.lock();
        self.wake.notify_all();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn overflow(&self, attempted: usize) -> RingError {
        RingError::Overflow {
            capacity: self.capacity(),
            pending: self.len(),
            attempted,
        }
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Store `bytes` and publish them with a single cursor update.
    ///
    /// Caller guarantees there is room for all of them.
    fn publish(&self, bytes: &[u8]) {
        let last = self.last.load(Ordering::Relaxed);
        for (i, b) in bytes.iter().enumerate() {
            self.slot(last + i as u64).store(*b, Ordering::Relaxed);
        }
        self.last.store(last + bytes.len() as u64, Ordering::Release);
        self.notify();
    }

    /// Write one byte, failing with `Overflow` if the ring is full.
    pub fn try_write_byte(&self, value: u8) -> Result<(), RingError> {
        self.try_write_slice(&[value])
    }

    /// Write all of `bytes` or none of them.
    pub fn try_write_slice(&self, bytes: &[u8]) -> Result<(), RingError> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        if bytes.len() > self.free() {
            return Err(self.overflow(bytes.len()));
        }
        if !bytes.is_empty() {
            self.publish(bytes);
        }
        Ok(())
    }

    /// Write one byte, blocking while the ring is full.
    ///
    /// Fails with `Overflow` if the ring stays full for longer than the stall
    /// timeout, and with `Closed` if the ring is closed while waiting.
    pub fn write_byte(&self, value: u8) -> Result<(), RingError> {
        self.wait_until(|ring| ring.free() > 0, 1)?;
        self.publish(&[value]);
        Ok(())
    }

    /// Write `bytes` in order, blocking whenever the ring is full.
    ///
    /// Bytes are published as space frees up, so a consumer may observe a
    /// prefix before the call returns.
    pub fn write_slice(&self, bytes: &[u8]) -> Result<(), RingError> {
        let mut rest = bytes;
        while !rest.is_empty() {
            self.wait_until(|ring| ring.free() > 0, rest.len())?;
            let n = self.free().min(rest.len());
            let (now, later) = rest.split_at(n);
            self.publish(now);
            rest = later;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Read one byte if available.
    pub fn try_read_byte(&self) -> Result<Option<u8>, RingError> {
        let first = self.first.load(Ordering::Relaxed);
        let last = self.last.load(Ordering::Acquire);
        if first >= last {
            return if self.is_closed() {
                Err(RingError::Closed)
            } else {
                Ok(None)
            };
        }
        let value = self.slot(first).load(Ordering::Relaxed);
        self.first.store(first + 1, Ordering::Release);
        self.notify();
        Ok(Some(value))
    }

    /// Read one byte, blocking while the ring is empty.
    pub fn read_byte(&self) -> Result<u8, RingError> {
        loop {
            if let Some(value) = self.try_read_byte()? {
                return Ok(value);
            }
            self.park_until(|ring| !ring.is_empty());
        }
    }

    /// Read up to `max` bytes that are available right now.
    ///
    /// Returns an empty vector when nothing is buffered; a closed and fully
    /// drained ring reports `Closed`.
    pub fn read_available(&self, max: usize) -> Result<Vec<u8>, RingError> {
        let first = self.first.load(Ordering::Relaxed);
        let last = self.last.load(Ordering::Acquire);
        let n = (last.saturating_sub(first) as usize).min(max);
        if n == 0 {
            return if self.is_closed() && first >= last {
                Err(RingError::Closed)
            } else {
                Ok(Vec::new())
            };
        }
        let out = (0..n as u64)
            .map(|i| self.slot(first + i).load(Ordering::Relaxed))
            .collect();
        self.first.store(first + n as u64, Ordering::Release);
        self.notify();
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Blocking
    // ------------------------------------------------------------------

    /// Wake parked threads, skipping the lock when nobody sleeps.
    fn notify(&self) {
        // Pairs with the fence in `register_sleeper`: either the sleeper sees
        // our cursor update, or we see its registration.
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::Relaxed) > 0 {
            let _gate = self.gate.lock();
            self.wake.notify_all();
        }
    }

    fn register_sleeper(&self) {
        self.sleepers.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Park the consumer until `ready` holds or the ring closes.
    fn park_until(&self, ready: impl Fn(&Self) -> bool) {
        let mut gate = self.gate.lock();
        self.register_sleeper();
        while !ready(self) && !self.is_closed() {
            self.wake.wait(&mut gate);
        }
        self.sleepers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Park the producer until `ready` holds, honoring the stall timeout.
    fn wait_until(&self, ready: impl Fn(&Self) -> bool, attempted: usize) -> Result<(), RingError> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        if ready(self) {
            return Ok(());
        }

        let deadline = self.stall_timeout.map(|t| Instant::now() + t);
        let mut gate = self.gate.lock();
        self.register_sleeper();
        let result = loop {
            if self.is_closed() {
                break Err(RingError::Closed);
            }
            if ready(self) {
                break Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut gate, deadline).timed_out() && !ready(self) {
                        break Err(self.overflow(attempted));
                    }
                }
                None => self.wake.wait(&mut gate),
            }
        };
        self.sleepers.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("first", &self.read_cursor())
            .field("last", &self.write_cursor())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_up_to_capacity_minus_one() {
        let capacity = 64;
        for n in 0..capacity {
            let ring = RingBuffer::new(capacity);
            let bytes: Vec<u8> = (0..n).map(|i| (i * 7) as u8).collect();
            for b in &bytes {
                ring.write_byte(*b).unwrap();
            }
            assert_eq!(ring.len(), n);
            let read: Vec<u8> = (0..n).map(|_| ring.read_byte().unwrap()).collect();
            assert_eq!(read, bytes);
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_holds_exactly_capacity() {
        let ring = RingBuffer::new(4);
        ring.try_write_slice(&[1, 2, 3, 4]).unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.read_available(16).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_overflow_detected_without_reads() {
        let ring = RingBuffer::new(8);
        for i in 0..8 {
            ring.try_write_byte(i).unwrap();
        }
        assert_eq!(
            ring.try_write_byte(99),
            Err(RingError::Overflow {
                capacity: 8,
                pending: 8,
                attempted: 1
            })
        );

        // Nothing was overwritten.
        assert_eq!(ring.read_available(8).unwrap(), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_blocking_write_reports_overflow_after_stall() {
        let ring = RingBuffer::with_stall_timeout(4, Some(Duration::from_millis(20)));
        for i in 0..4 {
            ring.write_byte(i).unwrap();
        }
        assert!(matches!(ring.write_byte(4), Err(RingError::Overflow { .. })));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_try_write_slice_is_all_or_nothing() {
        let ring = RingBuffer::new(4);
        ring.try_write_slice(&[1, 2]).unwrap();
        assert!(ring.try_write_slice(&[3, 4, 5]).is_err());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_wrap_around() {
        let ring = RingBuffer::new(4);
        for round in 0..10u8 {
            ring.try_write_slice(&[round, round + 1, round + 2]).unwrap();
            assert_eq!(ring.read_byte().unwrap(), round);
            assert_eq!(ring.read_available(2).unwrap(), vec![round + 1, round + 2]);
        }
        assert_eq!(ring.write_cursor(), 30);
        assert_eq!(ring.read_cursor(), 30);
    }

    #[test]
    fn test_read_blocks_until_written() {
        let ring = Arc::new(RingBuffer::new(16));
        let reader = {
            let ring = ring.clone();
            std::thread::spawn(move || ring.read_byte())
        };
        std::thread::sleep(Duration::from_millis(20));
        ring.write_byte(42).unwrap();
        assert_eq!(reader.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_write_blocks_until_read() {
        let ring = Arc::new(RingBuffer::new(2));
        ring.write_slice(&[1, 2]).unwrap();
        let writer = {
            let ring = ring.clone();
            std::thread::spawn(move || ring.write_slice(&[3, 4, 5]))
        };
        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.push(ring.read_byte().unwrap());
        }
        writer.join().unwrap().unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_large_stream_across_threads() {
        let ring = Arc::new(RingBuffer::new(97));
        let total = 100_000usize;
        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0..total {
                    ring.write_byte((i % 251) as u8).unwrap();
                }
            })
        };
        for i in 0..total {
            assert_eq!(ring.read_byte().unwrap(), (i % 251) as u8);
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let ring = Arc::new(RingBuffer::new(16));
        let reader = {
            let ring = ring.clone();
            std::thread::spawn(move || ring.read_byte())
        };
        std::thread::sleep(Duration::from_millis(20));
        ring.close();
        assert_eq!(reader.join().unwrap(), Err(RingError::Closed));
    }

    #[test]
    fn test_close_drains_buffered_bytes_first() {
        let ring = RingBuffer::new(16);
        ring.write_slice(b"ab").unwrap();
        ring.close();
        assert_eq!(ring.write_byte(b'c'), Err(RingError::Closed));
        assert_eq!(ring.read_byte(), Ok(b'a'));
        assert_eq!(ring.read_available(8), Ok(vec![b'b']));
        assert_eq!(ring.read_byte(), Err(RingError::Closed));
        assert_eq!(ring.read_available(8), Err(RingError::Closed));
    }
}

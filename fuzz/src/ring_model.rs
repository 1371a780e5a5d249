//! Drives a real `RingBuffer` through its non-blocking API next to a
//! `VecDeque<u8>` reference.

use std::collections::VecDeque;

use proofwire_transport_shm::{RingBuffer, RingError};

/// Smallest ring the harness builds.
pub const MIN_CAPACITY: usize = 1;
/// Largest ring the harness builds (keep small to find edge cases faster).
pub const MAX_CAPACITY: usize = 64;

/// Operations that can be performed on the ring.
#[derive(Clone, Debug)]
pub enum RingOp {
    WriteByte(u8),
    WriteSlice(Vec<u8>),
    ReadByte,
    ReadAvailable(usize),
    Close,
}

impl RingOp {
    /// Decode a fuzzer-chosen `(tag, byte, bytes)` triple.
    pub fn from_raw(tag: u8, byte: u8, bytes: &[u8]) -> Self {
        match tag % 5 {
            0 => RingOp::WriteByte(byte),
            1 => RingOp::WriteSlice(bytes.to_vec()),
            2 => RingOp::ReadByte,
            3 => RingOp::ReadAvailable(byte as usize),
            // Rare, or every run would end closed after a handful of ops.
            _ if byte == 0 => RingOp::Close,
            _ => RingOp::ReadByte,
        }
    }
}

/// Map any byte onto a capacity in `MIN_CAPACITY..=MAX_CAPACITY`.
pub fn capacity_from(byte: u8) -> usize {
    byte as usize % (MAX_CAPACITY - MIN_CAPACITY + 1) + MIN_CAPACITY
}

/// Execute a sequence of operations and verify invariants.
pub fn execute_and_verify(capacity: usize, ops: &[RingOp]) -> Result<(), String> {
    let ring = RingBuffer::with_stall_timeout(capacity, None);
    let mut expected: VecDeque<u8> = VecDeque::new();
    let mut closed = false;
    let mut written: u64 = 0;

    for (i, op) in ops.iter().enumerate() {
        match op {
            RingOp::WriteByte(b) => {
                check_write(&ring, &mut expected, closed, &[*b], ring.try_write_byte(*b), i)?;
            }
            RingOp::WriteSlice(bytes) => {
                check_write(&ring, &mut expected, closed, bytes, ring.try_write_slice(bytes), i)?;
            }
            RingOp::ReadByte => match (ring.try_read_byte(), expected.pop_front()) {
                (Ok(Some(got)), Some(want)) if got == want => {}
                (Ok(None), None) if !closed => {}
                (Err(RingError::Closed), None) if closed => {}
                (got, want) => {
                    return Err(format!(
                        "op {}: read {:?} but expected {:?} (closed={})",
                        i, got, want, closed
                    ));
                }
            },
            RingOp::ReadAvailable(max) => {
                let got = ring.read_available(*max);
                let n = expected.len().min(*max);
                let want: Vec<u8> = expected.drain(..n).collect();
                match got {
                    Ok(bytes) if bytes == want => {}
                    Err(RingError::Closed) if closed && want.is_empty() && expected.is_empty() => {}
                    other => {
                        return Err(format!(
                            "op {}: read_available({}) gave {:?}, expected {:?}",
                            i, max, other, want
                        ));
                    }
                }
            }
            RingOp::Close => {
                ring.close();
                closed = true;
            }
        }

        if let RingOp::WriteByte(_) | RingOp::WriteSlice(_) = op {
            written = ring.write_cursor();
        }
        verify_ring_invariants(&ring, &expected, written, i)?;
    }

    Ok(())
}

fn check_write(
    ring: &RingBuffer,
    expected: &mut VecDeque<u8>,
    closed: bool,
    bytes: &[u8],
    result: Result<(), RingError>,
    op_idx: usize,
) -> Result<(), String> {
    let fits = expected.len() + bytes.len() <= ring.capacity();
    match result {
        Ok(()) if !closed && fits => {
            expected.extend(bytes);
            Ok(())
        }
        Err(RingError::Closed) if closed => Ok(()),
        Err(RingError::Overflow {
            capacity,
            pending,
            attempted,
        }) if !closed && !fits => {
            if capacity != ring.capacity() || pending != expected.len() || attempted != bytes.len()
            {
                return Err(format!(
                    "op {}: overflow reported capacity={} pending={} attempted={}, \
                     expected {}/{}/{}",
                    op_idx,
                    capacity,
                    pending,
                    attempted,
                    ring.capacity(),
                    expected.len(),
                    bytes.len()
                ));
            }
            Ok(())
        }
        other => Err(format!(
            "op {}: writing {} byte(s) with {} of {} pending gave {:?} (closed={})",
            op_idx,
            bytes.len(),
            expected.len(),
            ring.capacity(),
            other,
            closed
        )),
    }
}

fn verify_ring_invariants(
    ring: &RingBuffer,
    expected: &VecDeque<u8>,
    written: u64,
    op_idx: usize,
) -> Result<(), String> {
    if ring.len() != expected.len() {
        return Err(format!(
            "after op {}: ring.len()={} but expected.len()={}",
            op_idx,
            ring.len(),
            expected.len()
        ));
    }

    if ring.len() > ring.capacity() {
        return Err(format!(
            "after op {}: len ({}) > capacity ({})",
            op_idx,
            ring.len(),
            ring.capacity()
        ));
    }

    let (first, last) = (ring.read_cursor(), ring.write_cursor());
    if last < first || (last - first) as usize != ring.len() {
        return Err(format!(
            "after op {}: cursors first={} last={} disagree with len {}",
            op_idx,
            first,
            last,
            ring.len()
        ));
    }

    if last != written {
        return Err(format!(
            "after op {}: write cursor moved to {} outside a write (was {})",
            op_idx, last, written
        ));
    }

    Ok(())
}

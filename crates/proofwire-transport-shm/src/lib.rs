//! proofwire-transport-shm: shared memory byte transport for proofwire.
//!
//! The compute worker and the relay worker exchange a continuous byte
//! stream through two fixed-size rings instead of copying messages.
//!
//! # Characteristics
//!
//! - SPSC byte rings, one per direction
//! - Cursors are atomics outside the byte array (acquire/release)
//! - Blocking reads/writes park on a condvar, never spin
//! - Overflow is fatal and reported, never a silent wrap
//! - A one-bit write lock keeps multi-byte writes contiguous
//! - An advisory progress counter for the controller
//!
//! # Architecture
//!
//! Each [`SharedTransport`] belongs to exactly one proof session.
//!
//! ```text
//! ┌──────────────┐   outbound ring (compute → network)   ┌──────────────┐
//! │   compute    │ ────────────────────────────────────► │    relay     │
//! │   worker     │                                       │    worker    │
//! │ ComputeView  │ ◄──────────────────────────────────── │  RelayView   │
//! └──────────────┘   inbound ring (network → compute)    └──────────────┘
//!         │                                                     │
//!         └── write lock                      progress counter ─┘
//! ```

pub mod lock;
pub mod progress;
pub mod ring;
mod transport;

pub use lock::{WriteGuard, WriteLock};
pub use progress::{percent_of, ProgressCounter, DEFAULT_EXPECTED_TOTAL};
pub use ring::{RingBuffer, RingError, DEFAULT_RING_CAPACITY, DEFAULT_STALL_TIMEOUT};
pub use transport::{ComputeView, RelayView, SharedTransport, ShmConfig};

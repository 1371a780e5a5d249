//! Advisory byte counter polled by the controller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Total communication volume of the reference session, in bytes.
pub const DEFAULT_EXPECTED_TOTAL: u64 = 10_137_050;

/// Cumulative bytes moved between the rings and the network.
///
/// Only the relay increments it. It is never used to decide that a stream is
/// complete.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    bytes: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `n` transferred bytes. Returns the new total.
    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.bytes.fetch_add(n, Ordering::AcqRel) + n
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Progress as a percentage of `expected_total`, clamped to `[0, 100]`.
    pub fn percent(&self, expected_total: u64) -> f64 {
        percent_of(self.load(), expected_total)
    }
}

/// `min(100, transferred / expected_total * 100)`.
///
/// An `expected_total` of zero reads as complete.
pub fn percent_of(transferred: u64, expected_total: u64) -> f64 {
    if expected_total == 0 {
        return 100.0;
    }
    (transferred as f64 / expected_total as f64 * 100.0).min(100.0)
}

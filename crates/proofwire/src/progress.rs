//! Turns the transport's byte counter into the published percentage.

use std::sync::Arc;

use proofwire_core::shm::{percent_of, SharedTransport};
use tokio::sync::watch;

/// Samples a session's counter and publishes `[0, 100]`, never going down.
pub(crate) struct ProgressReporter {
    transport: Arc<SharedTransport>,
    expected_total: u64,
    last: f64,
    tx: watch::Sender<f64>,
}

impl ProgressReporter {
    pub(crate) fn new(
        transport: Arc<SharedTransport>,
        expected_total: u64,
        tx: watch::Sender<f64>,
    ) -> Self {
        Self {
            transport,
            expected_total,
            last: 0.0,
            tx,
        }
    }

    /// Take a sample and publish it if it moved.
    pub(crate) fn sample(&mut self) -> f64 {
        let bytes = self.transport.progress().load();
        let percent = percent_of(bytes, self.expected_total).max(self.last);
        if percent > self.last {
            tracing::debug!(bytes, percent, "progress");
        }
        self.last = percent;
        self.tx.send_if_modified(|current| {
            if *current == percent {
                false
            } else {
                *current = percent;
                true
            }
        });
        percent
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.transport.progress().load()
    }
}

//! How a session ended, and the user-facing summary of it.

use std::fmt;
use std::time::Duration;

use proofwire_core::{Completion, Fault, WitnessError};
use thiserror::Error;

/// Final verdict of one proof session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every check passed.
    Accepted,
    /// The computation ran to the end and a check failed.
    Rejected { message: String },
    /// A ring filled up and nobody drained it.
    Overflow { message: String },
    /// The peer link or the shared transport went away.
    TransportFailure { message: String },
    /// Control traffic arrived out of order or for the wrong session.
    ProtocolViolation { message: String },
    /// The computation broke instead of producing a verdict.
    Aborted { message: String },
    /// The supervisory timeout fired first.
    TimedOut { after: Duration },
}

impl Outcome {
    pub fn from_completion(completion: Completion) -> Self {
        if completion.success {
            return Outcome::Accepted;
        }
        match completion.fault {
            Some(fault) => Self::from_fault(fault),
            None => Outcome::Rejected {
                message: completion.message.unwrap_or_default(),
            },
        }
    }

    pub fn from_fault(fault: Fault) -> Self {
        match fault {
            Fault::Overflow(message) => Outcome::Overflow { message },
            Fault::Transport(message) => Outcome::TransportFailure { message },
            Fault::Protocol(message) => Outcome::ProtocolViolation { message },
            Fault::Aborted(message) => Outcome::Aborted { message },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Accepted)
    }

    /// Diagnostic text, if the session did not succeed.
    pub fn message(&self) -> Option<String> {
        match self {
            Outcome::Accepted => None,
            Outcome::Rejected { message }
            | Outcome::Overflow { message }
            | Outcome::TransportFailure { message }
            | Outcome::ProtocolViolation { message }
            | Outcome::Aborted { message } => Some(message.clone()),
            Outcome::TimedOut { after } => {
                Some(format!("session timed out after {:.2} seconds", after.as_secs_f64()))
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Accepted => f.write_str("accepted"),
            Outcome::Rejected { .. } => f.write_str("rejected"),
            Outcome::Overflow { .. } => f.write_str("overflow"),
            Outcome::TransportFailure { .. } => f.write_str("transport failure"),
            Outcome::ProtocolViolation { .. } => f.write_str("protocol violation"),
            Outcome::Aborted { .. } => f.write_str("aborted"),
            Outcome::TimedOut { .. } => f.write_str("timed out"),
        }
    }
}

/// What a finished session reports to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: u64,
    pub outcome: Outcome,
    /// From session start to completion.
    pub elapsed: Duration,
    /// Bytes that crossed the relay in either direction.
    pub bytes_transferred: u64,
    /// Last published progress percentage.
    pub progress: f64,
}

impl SessionReport {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    /// The completion notification shown to the user.
    ///
    /// Only a rejected proof reads as a failed assertion; infrastructure
    /// failures each carry their own prefix.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Accepted => format!(
                "All checks passed. Total time: {:.2} seconds.",
                self.elapsed.as_secs_f64()
            ),
            Outcome::Rejected { message } => format!("Assertion failed: {message}"),
            Outcome::Overflow { message } => format!("Buffer overflow: {message}"),
            Outcome::TransportFailure { message } => format!("Transport failure: {message}"),
            Outcome::ProtocolViolation { message } => format!("Protocol violation: {message}"),
            Outcome::Aborted { message } => format!("Computation aborted: {message}"),
            Outcome::TimedOut { after } => {
                format!("Session timed out after {:.2} seconds.", after.as_secs_f64())
            }
        }
    }
}

/// Errors starting a session. Once running, every failure is an [`Outcome`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("witness: {0}")]
    Witness(#[from] WitnessError),

    #[error("failed to start compute worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("session supervisor stopped unexpectedly: {0}")]
    Supervisor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Outcome, millis: u64) -> SessionReport {
        SessionReport {
            session_id: 1,
            outcome,
            elapsed: Duration::from_millis(millis),
            bytes_transferred: 0,
            progress: 0.0,
        }
    }

    #[test]
    fn test_success_summary() {
        assert_eq!(
            report(Outcome::Accepted, 1234).summary(),
            "All checks passed. Total time: 1.23 seconds."
        );
    }

    #[test]
    fn test_failure_summary_carries_message() {
        let r = report(
            Outcome::Rejected {
                message: "path leaves the region".into(),
            },
            10,
        );
        assert!(!r.success());
        assert_eq!(r.summary(), "Assertion failed: path leaves the region");
    }

    #[test]
    fn test_completion_mapping() {
        assert_eq!(
            Outcome::from_completion(Completion::from_diagnostic("")),
            Outcome::Accepted
        );
        assert_eq!(
            Outcome::from_completion(Completion::from_diagnostic("nope")),
            Outcome::Rejected {
                message: "nope".into()
            }
        );
        assert_eq!(
            Outcome::from_completion(Completion::faulted(Fault::Overflow("full".into()))),
            Outcome::Overflow {
                message: "full".into()
            }
        );
    }

    #[test]
    fn test_timeout_message() {
        let r = report(
            Outcome::TimedOut {
                after: Duration::from_secs(2),
            },
            2000,
        );
        assert_eq!(r.summary(), "Session timed out after 2.00 seconds.");
        assert_eq!(
            r.outcome.message().as_deref(),
            Some("session timed out after 2.00 seconds")
        );
    }

    #[test]
    fn test_faults_are_not_reported_as_assertions() {
        let cases = [
            (
                Outcome::Overflow {
                    message: "ring full".into(),
                },
                "Buffer overflow: ring full",
            ),
            (
                Outcome::TransportFailure {
                    message: "peer closed".into(),
                },
                "Transport failure: peer closed",
            ),
            (
                Outcome::ProtocolViolation {
                    message: "second handshake".into(),
                },
                "Protocol violation: second handshake",
            ),
            (
                Outcome::Aborted {
                    message: "computation panicked: boom".into(),
                },
                "Computation aborted: computation panicked: boom",
            ),
        ];
        for (outcome, expected) in cases {
            let summary = report(outcome, 5).summary();
            assert_eq!(summary, expected);
            assert!(!summary.starts_with("Assertion failed"));
        }
    }
}

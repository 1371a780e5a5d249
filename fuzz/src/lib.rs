//! Property harnesses for proofwire's ring buffer and control protocol.
//!
//! Each model drives the real implementation next to a trivially correct
//! reference and reports the first divergence.

pub mod protocol_model;
pub mod ring_model;

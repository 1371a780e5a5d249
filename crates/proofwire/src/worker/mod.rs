//! The two workers a session drives.
//!
//! - [`ComputeWorker`]: runs the computation on a dedicated thread, blocking
//!   on the rings
//! - [`RelayWorker`]: a tokio task bridging the rings and the peer link

mod compute;
mod relay;

pub use compute::ComputeWorker;
pub use relay::RelayWorker;

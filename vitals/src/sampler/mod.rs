//! Periodic resource sampling.
//!
//! The sampler captures one resource observation per scheduling tick,
//! stamps it with the restart flag, and hands it off for durable storage
//! through the retry executor without blocking the next tick.

pub mod probe;
pub mod restart;
pub mod service;

pub use probe::{ResourceProbe, ResourceReadings, SysinfoProbe};
pub use restart::RestartDetector;
pub use service::ResourceSampler;

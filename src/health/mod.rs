//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Service enters self-protection
//!     → DegradeController health loop
//!     → probe.rs (TCP connect or HTTP request per node, concurrently)
//!     → healthy set decides exit / hold / panic
//! ```
//!
//! # Design Decisions
//! - Probes only run for services that are degraded
//! - A probe failure is a result, never an error that stops the loop
//! - The prober is a trait so tests can script health

pub mod probe;

pub use probe::{HealthProber, NetProber, ProbeTarget};

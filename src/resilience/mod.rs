//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call outcome (success / failure):
//!     → sampler.rs (token bucket, bounds inspected outcomes per second)
//!     → window.rs (10 buckets over 10s)
//!     → circuit_breaker.rs (trip check every check period)
//!     → interceptor may veto a move into Open
//!     → state listener adjusts node weight
//!
//! While half-open:
//!     → ramp.rs (weight grows with time since the re-arm)
//! ```
//!
//! # Design Decisions
//! - Per-node circuit breaker (not global)
//! - Time-based transitions are applied lazily on the next call
//! - All timers use tokio's clock so tests can pause time

pub mod circuit_breaker;
pub mod ramp;
pub mod sampler;
pub mod window;

pub use circuit_breaker::{
    default_ready_to_trip, BreakerBuilder, BreakerState, CircuitBreaker, Interceptor,
    ReadyToTrip, StateListener,
};
pub use ramp::RatioRamp;
pub use window::{Counts, SlidingWindow};

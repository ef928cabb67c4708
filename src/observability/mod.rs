//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, rebalancers and degrade controllers produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!     → breakers.rs (latest breaker state per node, for the admin API)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap and never block the request path
//! - Storage and transport of metrics belong to the installed recorder

pub mod breakers;
pub mod logging;
pub mod metrics;

pub use breakers::{BreakerEntry, BreakerStates};

//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Discovery push → Rebalancer::reload
//!     → DegradeController (accept / hold / escalate)
//!     → rebalancer.rs builds a fresh node table:
//!         - node.rs (weights, breaker, ramp per node)
//!         - picker.rs (round_robin.rs or random.rs)
//!
//! Caller:
//!     Rebalancer::next → picker → payload
//!     Rebalancer::record_metrics(address, status)
//!         → classify.rs (status → success / failure)
//!         → node breaker → weight change on transition
//! ```
//!
//! # Design Decisions
//! - A table generation is immutable in membership except for `upsert`;
//!   reloads swap a whole new generation
//! - Breaker state never carries across generations
//! - A breaker may only open if enough other nodes stay Closed

pub mod classify;
pub mod node;
pub mod picker;
pub mod random;
pub mod rebalancer;
pub mod round_robin;

pub use classify::StatusClassifier;
pub use picker::{PickerFactory, PickerKind, WeightedPicker};
pub use random::WeightedRandom;
pub use rebalancer::{NodeStatus, Rebalancer, RebalancerBuilder};
pub use round_robin::SmoothRoundRobin;

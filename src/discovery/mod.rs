//! Service discovery inputs.
//!
//! # Data Flow
//! ```text
//! Discovery source (config file, registry watch, ...)
//!     → Vec<Node<P>> per service
//!     → Rebalancer::reload
//!     → DegradeController decides accept / hold / escalate
//! ```
//!
//! # Design Decisions
//! - Nodes are keyed by `host:port`
//! - Lookup failures never clear the applied list

pub mod node;
pub mod source;

pub use node::{CheckKind, HealthCheckSpec, Node};
pub use source::{Discovery, StaticDiscovery};

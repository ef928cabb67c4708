//! Client-side resilience for picking upstream nodes.
//!
//! Circuit breakers per node, ramped recovery, weighted selection, and
//! self-protection against collapsing discovery feeds.

pub mod admin;
pub mod config;
pub mod degrade;
pub mod discovery;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;

pub use config::GuardConfig;
pub use degrade::{DegradeRegistry, ServiceState};
pub use discovery::{Discovery, Node, StaticDiscovery};
pub use error::{GuardError, GuardResult};
pub use lifecycle::Shutdown;
pub use load_balancer::Rebalancer;

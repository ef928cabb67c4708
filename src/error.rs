//! Error taxonomy for node selection and discovery handling.
//!
//! Only [`crate::load_balancer::Rebalancer::next`] surfaces an error on the
//! request path, and only when the node table is empty. Everything else is
//! logged and absorbed so the last known-good list keeps serving.

use thiserror::Error;

/// Errors produced by the balancer, breakers and degrade controllers.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Invalid node id or weight.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// No nodes are available for the service.
    #[error("no nodes available for service '{0}'")]
    NotFound(String),

    /// The discovery source could not produce a node list.
    #[error("lookup failed for service '{service}': {reason}")]
    Lookup { service: String, reason: String },

    /// A picker or breaker could not be constructed.
    #[error("build error: {0}")]
    Build(String),

    /// A health probe failed. Non-fatal; it only counts the node as unhealthy.
    #[error("health check failed for {node}: {reason}")]
    HealthCheck { node: String, reason: String },
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

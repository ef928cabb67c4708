//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!
//! Breaker settings and degrade options:
//!     → hot.rs (versioned snapshot behind ArcSwap)
//!     → breakers / controllers load one snapshot per operation
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → HotSwap::store (version bump)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Readers never see a partially-updated snapshot

pub mod hot;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use hot::{HotSwap, Versioned};
pub use schema::{
    AdminConfig, BalancerConfig, BreakerSettings, DegradeOpts, GuardConfig, NodeConfig,
    ObservabilityConfig, ServiceConfig,
};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging + metrics → Rebalancers → Admin API
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C / SIGTERM → broadcast → admin server drains
//!     → DegradeRegistry::shutdown cancels health loops → Exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Health loops are cancelled explicitly, never left to process exit

pub mod shutdown;

pub use shutdown::Shutdown;

//! Discovery-outage tolerance.
//!
//! # Data Flow
//! ```text
//! Rebalancer::reload(nodes)
//!     → registry.rs (controller per service)
//!     → controller.rs
//!         Normal: ratio checks against history.rs windows
//!             pass → append to recent + stable, apply
//!             fail → SelfProtection, start health loop
//!         SelfProtection / Panic: re-apply held list
//!
//! Health loop (per degraded service):
//!     probe union(latest, newest recent) via health::probe
//!     → Panic (apply stable snapshot) / SelfProtection (apply healthy set)
//!     → Normal (healthy set == latest, or max time reached)
//! ```
//!
//! # Design Decisions
//! - Serving stale data beats serving nothing
//! - Ratios are never re-evaluated on pushes while degraded
//! - One cancellation token per health loop; cancelled on exit to Normal,
//!   global disable, shutdown and drop

pub mod controller;
pub mod history;
pub mod registry;
pub mod state;

pub use controller::{ApplyFn, ControllerStatus, DegradeController};
pub use history::{Elem, HistoryWindow};
pub use registry::DegradeRegistry;
pub use state::ServiceState;

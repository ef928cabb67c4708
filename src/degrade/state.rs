//! Per-service degrade state.

use std::fmt;

use serde::Serialize;

/// Trust level of a service's discovery feed.
///
/// ```text
/// Normal → SelfProtection   pushed list shrank below the threshold
/// SelfProtection → Panic    probed healthy set below the panic threshold
/// Panic → SelfProtection    probed healthy set recovered to the threshold
/// SelfProtection → Normal   healthy set matches discovery, or max time elapsed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Normal,
    SelfProtection,
    Panic,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Normal => "normal",
            ServiceState::SelfProtection => "self_protection",
            ServiceState::Panic => "panic",
        }
    }

    pub fn is_degraded(&self) -> bool {
        *self != ServiceState::Normal
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::node::HealthCheckSpec;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Per-node circuit breaker settings.
    pub breaker: BreakerSettings,

    /// Self-protection / panic settings.
    pub degrade: DegradeOpts,

    /// Rebalancer settings.
    pub balancer: BalancerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Statically configured services and their nodes.
    pub services: Vec<ServiceConfig>,
}

/// Circuit breaker settings. Hot-swappable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Maximum sampled outcomes per second per node.
    pub sample_rate: u32,

    /// How often the trip condition is re-evaluated, in milliseconds.
    pub check_period_ms: u64,

    /// Time spent Open before probing again, in milliseconds.
    pub fallback_ms: u64,

    /// Time spent HalfOpen before closing, in milliseconds.
    pub recovery_ms: u64,

    /// Weight ramp duration in milliseconds (defaults to `recovery_ms`).
    pub ramp_ms: Option<u64>,

    /// Length of the sliding statistics window in seconds.
    pub window_secs: u64,

    /// Number of buckets in the sliding window.
    pub window_buckets: u32,

    /// Failure ratio above which the breaker trips.
    pub failure_ratio: f64,
}

impl BreakerSettings {
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms)
    }

    pub fn fallback(&self) -> Duration {
        Duration::from_millis(self.fallback_ms)
    }

    pub fn recovery(&self) -> Duration {
        Duration::from_millis(self.recovery_ms)
    }

    pub fn ramp(&self) -> Duration {
        Duration::from_millis(self.ramp_ms.unwrap_or(self.recovery_ms))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 100,
            check_period_ms: 100,
            fallback_ms: 10_000,
            recovery_ms: 10_000,
            ramp_ms: None,
            window_secs: 10,
            window_buckets: 10,
            failure_ratio: 0.9,
        }
    }
}

/// Discovery-outage tolerance settings. Hot-swappable.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DegradeOpts {
    /// Master switch. Disabling forces every service back to Normal.
    pub enabled: bool,

    /// Online ratio below which self-protection is entered.
    pub threshold: f64,

    /// Online ratio below which panic is entered.
    pub panic_threshold: f64,

    /// History retention window in seconds.
    pub contrast_interval_secs: u64,

    /// Minimum spacing between history snapshots in seconds.
    pub save_interval_secs: u64,

    /// Health-check cycle interval in seconds.
    pub health_check_interval_secs: u64,

    /// Per-probe timeout in milliseconds.
    pub ping_timeout_ms: u64,

    /// Longest time a service may stay in self-protection, in seconds.
    pub self_protection_max_secs: u64,

    /// Nodes added to the online count before the threshold comparison,
    /// so a single flapping node does not trigger self-protection.
    pub flap_slack: usize,
}

impl DegradeOpts {
    pub fn contrast_interval(&self) -> Duration {
        Duration::from_secs(self.contrast_interval_secs)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn self_protection_max(&self) -> Duration {
        Duration::from_secs(self.self_protection_max_secs)
    }
}

impl Default for DegradeOpts {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
            panic_threshold: 0.1,
            contrast_interval_secs: 15 * 60,
            save_interval_secs: 60,
            health_check_interval_secs: 30,
            ping_timeout_ms: 500,
            self_protection_max_secs: 24 * 60 * 60,
            flap_slack: 1,
        }
    }
}

/// Rebalancer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Minimum fraction of Closed breakers that must remain after a trip.
    pub healthy_node_percent: f64,

    /// Picker algorithm: `round_robin` or `random`.
    pub picker: String,

    /// Status codes counted as failures. `None` uses 404 and 499..=600.
    pub failure_status_codes: Option<Vec<u16>>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            healthy_node_percent: 0.8,
            picker: "round_robin".to_string(),
            failure_status_codes: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: `pretty` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A statically configured service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,

    /// Nodes currently registered for the service.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

/// A statically configured node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Display name (defaults to the address).
    pub name: Option<String>,

    /// Host name or IP.
    pub host: String,

    /// Port.
    pub port: u16,

    /// Selection weight (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Marked offline by the registry.
    #[serde(default)]
    pub offline: bool,

    /// Optional health check definition.
    pub health_check: Option<HealthCheckSpec>,
}

impl NodeConfig {
    /// `host:port`, the unique key of the node.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_weight() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = GuardConfig::default();
        assert_eq!(cfg.breaker.sample_rate, 100);
        assert_eq!(cfg.breaker.ramp(), cfg.breaker.recovery());
        assert_eq!(cfg.degrade.contrast_interval(), Duration::from_secs(900));
        assert_eq!(cfg.degrade.ping_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.balancer.healthy_node_percent, 0.8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: GuardConfig = toml::from_str(
            r#"
            [degrade]
            threshold = 0.7

            [[services]]
            name = "orders"
            nodes = [{ host = "10.0.0.1", port = 8080 }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.degrade.threshold, 0.7);
        assert_eq!(cfg.degrade.panic_threshold, 0.1);
        assert_eq!(cfg.services[0].nodes[0].weight, 1);
        assert_eq!(cfg.services[0].nodes[0].address(), "10.0.0.1:8080");
    }
}

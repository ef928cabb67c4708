//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and uniqueness.
//! All problems are reported together, not just the first one.

use std::collections::HashSet;

use crate::config::schema::GuardConfig;
use crate::load_balancer::PickerKind;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_ratio(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(ValidationError::new(field, format!("must be in (0, 1], got {}", value)));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let b = &config.breaker;
    check_positive(&mut errors, "breaker.sample_rate", b.sample_rate as u64);
    check_positive(&mut errors, "breaker.check_period_ms", b.check_period_ms);
    check_positive(&mut errors, "breaker.fallback_ms", b.fallback_ms);
    check_positive(&mut errors, "breaker.recovery_ms", b.recovery_ms);
    check_positive(&mut errors, "breaker.window_secs", b.window_secs);
    check_positive(&mut errors, "breaker.window_buckets", b.window_buckets as u64);
    check_ratio(&mut errors, "breaker.failure_ratio", b.failure_ratio);
    if b.ramp_ms == Some(0) {
        errors.push(ValidationError::new("breaker.ramp_ms", "must be greater than zero"));
    }

    let d = &config.degrade;
    check_ratio(&mut errors, "degrade.threshold", d.threshold);
    check_ratio(&mut errors, "degrade.panic_threshold", d.panic_threshold);
    if d.panic_threshold > d.threshold {
        errors.push(ValidationError::new(
            "degrade.panic_threshold",
            "must not exceed degrade.threshold",
        ));
    }
    check_positive(&mut errors, "degrade.contrast_interval_secs", d.contrast_interval_secs);
    check_positive(&mut errors, "degrade.health_check_interval_secs", d.health_check_interval_secs);
    check_positive(&mut errors, "degrade.ping_timeout_ms", d.ping_timeout_ms);
    check_positive(&mut errors, "degrade.self_protection_max_secs", d.self_protection_max_secs);

    check_ratio(&mut errors, "balancer.healthy_node_percent", config.balancer.healthy_node_percent);
    if let Err(e) = config.balancer.picker.parse::<PickerKind>() {
        errors.push(ValidationError::new("balancer.picker", e.to_string()));
    }

    let mut names = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("services[{}].name", i), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{}].name", i),
                format!("duplicate service '{}'", service.name),
            ));
        }

        let mut addresses = HashSet::new();
        for (j, node) in service.nodes.iter().enumerate() {
            let field = format!("services[{}].nodes[{}]", i, j);
            if node.host.trim().is_empty() {
                errors.push(ValidationError::new(format!("{}.host", field), "must not be empty"));
            }
            if !addresses.insert(node.address()) {
                errors.push(ValidationError::new(
                    field,
                    format!("duplicate address {}", node.address()),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

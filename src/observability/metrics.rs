//! Metrics emission.
//!
//! # Metrics
//! - `guard_breaker_transitions_total` (counter): by service, node, from, to
//! - `guard_breaker_state` (gauge): 0=closed, 1=open, 2=half-open, by service and node
//! - `guard_breaker_open_seconds` / `guard_breaker_half_open_seconds` (gauge):
//!   time spent in the state being left, by service and node
//! - `guard_open_failures_total` (counter): failures reported while Open, by service and node
//! - `guard_self_protection_seconds` (gauge): time in a degraded service state
//! - `guard_panic` (gauge): 1 while a service is in panic
//! - `guard_health_checks_total` (counter): probe results by service
//!
//! # Design Decisions
//! - Emission goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is installed by the daemon only

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::degrade::ServiceState;
use crate::resilience::BreakerState;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn describe_metrics() {
    describe_counter!("guard_breaker_transitions_total", "Breaker state transitions");
    describe_gauge!("guard_breaker_state", "Breaker state: 0=closed, 1=open, 2=half-open");
    describe_gauge!("guard_breaker_open_seconds", "Seconds spent Open before the last transition");
    describe_gauge!("guard_breaker_half_open_seconds", "Seconds spent HalfOpen before the last transition");
    describe_counter!("guard_open_failures_total", "Failures reported for nodes whose breaker is Open");
    describe_gauge!("guard_self_protection_seconds", "Seconds the service has been degraded");
    describe_gauge!("guard_panic", "1 while the service is in panic mode");
    describe_counter!("guard_health_checks_total", "Health probe results");
}

pub fn record_breaker_transition(
    service: &str,
    node: &str,
    from: BreakerState,
    to: BreakerState,
    time_in_from: Duration,
) {
    ::metrics::counter!(
        "guard_breaker_transitions_total",
        "service" => service.to_string(),
        "node" => node.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);

    let name = match from {
        BreakerState::Open => "guard_breaker_open_seconds",
        BreakerState::HalfOpen => "guard_breaker_half_open_seconds",
        BreakerState::Closed => return,
    };
    ::metrics::gauge!(name, "service" => service.to_string(), "node" => node.to_string())
        .set(time_in_from.as_secs_f64());
}

pub fn record_open_failure(service: &str, node: &str) {
    ::metrics::counter!(
        "guard_open_failures_total",
        "service" => service.to_string(),
        "node" => node.to_string()
    )
    .increment(1);
}

pub fn record_breaker_state(service: &str, node: &str, state: BreakerState) {
    ::metrics::gauge!(
        "guard_breaker_state",
        "service" => service.to_string(),
        "node" => node.to_string()
    )
    .set(state as u8 as f64);
}

pub fn record_service_state(service: &str, state: ServiceState, degraded_for: Duration) {
    let secs = if state == ServiceState::Normal {
        0.0
    } else {
        degraded_for.as_secs_f64()
    };
    ::metrics::gauge!("guard_self_protection_seconds", "service" => service.to_string()).set(secs);

    let panic = if state == ServiceState::Panic { 1.0 } else { 0.0 };
    ::metrics::gauge!("guard_panic", "service" => service.to_string()).set(panic);
}

pub fn record_health_check(service: &str, healthy: bool) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    ::metrics::counter!(
        "guard_health_checks_total",
        "service" => service.to_string(),
        "result" => result
    )
    .increment(1);
}

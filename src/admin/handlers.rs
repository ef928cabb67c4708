use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::degrade::{ControllerStatus, ServiceState};
use crate::load_balancer::NodeStatus;
use crate::observability::BreakerEntry;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub protection_enabled: bool,
    pub services: usize,
    pub self_protection: usize,
    pub panic: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub degrade: Option<ControllerStatus>,
    pub name: String,
    pub panic_table: bool,
    pub nodes: Vec<NodeStatus>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let statuses = state.registry.statuses();
    let count = |s: ServiceState| statuses.iter().filter(|c| c.state == s).count();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        protection_enabled: state.registry.opts().load().value.enabled,
        services: state.balancers.len(),
        self_protection: count(ServiceState::SelfProtection),
        panic: count(ServiceState::Panic),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceView>> {
    let mut views: Vec<ServiceView> = state
        .balancers
        .iter()
        .map(|entry| {
            let rb = entry.value();
            ServiceView {
                degrade: state.registry.get(rb.service()).map(|c| c.status()),
                name: rb.service().to_string(),
                panic_table: rb.is_panic(),
                nodes: rb.snapshot(),
            }
        })
        .collect();
    views.sort_by(|a, b| a.name.cmp(&b.name));
    Json(views)
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerEntry>> {
    Json(state.breakers.snapshot())
}

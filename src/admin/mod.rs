//! Read-only admin API.
//!
//! # Routes
//! - `GET /admin/status`: version and service counts by state
//! - `GET /admin/services`: degrade status and node table per service
//! - `GET /admin/breakers`: latest breaker state per node
//!
//! All routes require `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use dashmap::DashMap;
use tower_http::trace::TraceLayer;

use crate::degrade::DegradeRegistry;
use crate::load_balancer::Rebalancer;
use crate::observability::BreakerStates;

use self::auth::admin_auth_middleware;
use self::handlers::{get_breakers, get_services, get_status};

/// Rebalancers by service name.
pub type Balancers = DashMap<String, Arc<Rebalancer<String>>>;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<DegradeRegistry<String>>,
    pub balancers: Arc<Balancers>,
    pub breakers: Arc<BreakerStates>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/breakers", get(get_breakers))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

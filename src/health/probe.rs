//! Node probes used while a service is degraded.
//!
//! # Responsibilities
//! - TCP connect probe (default)
//! - HTTP probe with configurable method, path and headers; any 2xx is healthy
//! - Bound every probe by a timeout

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpStream;
use tokio::time;
use url::Url;

use crate::discovery::{CheckKind, HealthCheckSpec, Node};
use crate::error::{GuardError, GuardResult};

const USER_AGENT: &str = "upstream-guard-health-check";

/// What to probe, detached from the node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub address: String,
    pub host: String,
    pub port: u16,
    pub spec: Option<HealthCheckSpec>,
}

impl ProbeTarget {
    pub fn from_node<P>(node: &Node<P>) -> Self {
        Self {
            address: node.address.clone(),
            host: node.host.clone(),
            port: node.port,
            spec: node.health_check.clone(),
        }
    }

    /// Probe timeout: the node's own, else `default`.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.spec.as_ref().and_then(|s| s.timeout()).unwrap_or(default)
    }

    /// URL for an HTTP probe.
    pub fn http_url(&self) -> GuardResult<Url> {
        let target = self
            .spec
            .as_ref()
            .and_then(|s| s.target.as_deref())
            .unwrap_or("/");
        let parsed = if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else {
            Url::parse(&format!("http://{}/", self.address)).and_then(|base| base.join(target))
        };
        parsed.map_err(|e| self.failure(format!("invalid probe url '{}': {}", target, e)))
    }

    fn failure(&self, reason: impl Into<String>) -> GuardError {
        GuardError::HealthCheck {
            node: self.address.clone(),
            reason: reason.into(),
        }
    }
}

/// Probe capability. Implementations must honour `timeout`.
pub trait HealthProber: Send + Sync {
    fn probe<'a>(&'a self, target: &'a ProbeTarget, timeout: Duration) -> BoxFuture<'a, GuardResult<()>>;
}

/// TCP and HTTP prober over tokio and hyper.
pub struct NetProber {
    client: Client<HttpConnector, Body>,
}

impl NetProber {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    async fn probe_tcp(&self, target: &ProbeTarget, timeout: Duration) -> GuardResult<()> {
        let addr = target
            .spec
            .as_ref()
            .and_then(|s| s.target.clone())
            .unwrap_or_else(|| target.address.clone());

        match time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(target.failure(format!("connect: {}", e))),
            Err(_) => Err(target.failure("timeout")),
        }
    }

    async fn probe_http(&self, target: &ProbeTarget, spec: &HealthCheckSpec, timeout: Duration) -> GuardResult<()> {
        let url = target.http_url()?;
        let method = Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| target.failure(format!("invalid method '{}'", spec.method)))?;

        let mut builder = Request::builder()
            .method(method)
            .uri(url.as_str())
            .header("user-agent", USER_AGENT);
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(Body::empty())
            .map_err(|e| target.failure(format!("request: {}", e)))?;

        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(target.failure(format!("status {}", response.status()))),
            Ok(Err(e)) => Err(target.failure(format!("request: {}", e))),
            Err(_) => Err(target.failure("timeout")),
        }
    }
}

impl Default for NetProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProber for NetProber {
    fn probe<'a>(&'a self, target: &'a ProbeTarget, timeout: Duration) -> BoxFuture<'a, GuardResult<()>> {
        Box::pin(async move {
            let result = match &target.spec {
                Some(spec) if spec.kind == CheckKind::Http => self.probe_http(target, spec, timeout).await,
                _ => self.probe_tcp(target, timeout).await,
            };
            if let Err(e) = &result {
                tracing::debug!(node = %target.address, error = %e, "Probe failed");
            }
            result
        })
    }
}

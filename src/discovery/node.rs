//! Nodes as produced by a discovery source.
//!
//! A [`Node`] is immutable once emitted. Its `address` (`host:port`) is the
//! unique key used by the rebalancer table, the history windows and the
//! health-check loop.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Probe flavour for a node health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    #[default]
    Tcp,
    Http,
}

/// How to probe a node while its service is degraded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthCheckSpec {
    /// TCP connect or HTTP request.
    #[serde(default)]
    pub kind: CheckKind,

    /// `host:port` for TCP; a path (`/health`) or full URL for HTTP.
    /// Defaults to the node address.
    pub target: Option<String>,

    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra HTTP request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Preferred probe interval in seconds.
    pub interval_secs: Option<u64>,

    /// Probe timeout in milliseconds (default: the degrade ping timeout).
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HealthCheckSpec {
    pub fn tcp() -> Self {
        Self {
            kind: CheckKind::Tcp,
            target: None,
            method: default_method(),
            headers: BTreeMap::new(),
            interval_secs: None,
            timeout_ms: None,
        }
    }

    pub fn http(path: impl Into<String>) -> Self {
        Self {
            kind: CheckKind::Http,
            target: Some(path.into()),
            ..Self::tcp()
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A backend instance reported by discovery.
///
/// `P` is the caller-owned payload used to dial the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<P> {
    pub address: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub is_offline: bool,
    pub health_check: Option<HealthCheckSpec>,
    pub payload: P,
}

impl<P> Node<P> {
    pub fn new(host: impl Into<String>, port: u16, weight: u32, payload: P) -> Self {
        let host = host.into();
        let address = format!("{}:{}", host, port);
        Self {
            name: address.clone(),
            address,
            host,
            port,
            weight,
            is_offline: false,
            health_check: None,
            payload,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn offline(mut self) -> Self {
        self.is_offline = true;
        self
    }

    pub fn with_health_check(mut self, spec: HealthCheckSpec) -> Self {
        self.health_check = Some(spec);
        self
    }
}

/// True when both lists contain exactly the same addresses.
pub fn same_members<P>(a: &[Node<P>], b: &[Node<P>]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let left: HashSet<&str> = a.iter().map(|n| n.address.as_str()).collect();
    let right: HashSet<&str> = b.iter().map(|n| n.address.as_str()).collect();
    left == right
}

/// Union of several lists, keeping the first occurrence of each address.
pub fn union_by_address<P: Clone>(lists: &[&[Node<P>]]) -> Vec<Node<P>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        for node in list.iter() {
            if seen.insert(node.address.clone()) {
                out.push(node.clone());
            }
        }
    }
    out
}

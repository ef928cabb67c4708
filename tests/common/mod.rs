//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use upstream_guard::config::{DegradeOpts, HotSwap};
use upstream_guard::health::{HealthProber, ProbeTarget};
use upstream_guard::{DegradeRegistry, GuardError, GuardResult, Node, Rebalancer};

/// Nodes `10.0.0.1:9000+i` for `i` in `range`, payload = address.
pub fn nodes(range: std::ops::Range<u16>, weight: u32) -> Vec<Node<String>> {
    range
        .map(|i| {
            let port = 9000 + i;
            Node::new("10.0.0.1", port, weight, format!("10.0.0.1:{}", port))
        })
        .collect()
}

pub fn addresses(nodes: &[Node<String>]) -> Vec<String> {
    nodes.iter().map(|n| n.address.clone()).collect()
}

/// Prober whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedProber {
    healthy: Mutex<HashSet<String>>,
    calls: Mutex<usize>,
}

impl ScriptedProber {
    pub fn set_healthy<I: IntoIterator<Item = String>>(&self, addrs: I) {
        *self.healthy.lock() = addrs.into_iter().collect();
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl HealthProber for ScriptedProber {
    fn probe<'a>(&'a self, target: &'a ProbeTarget, _timeout: Duration) -> BoxFuture<'a, GuardResult<()>> {
        *self.calls.lock() += 1;
        let ok = self.healthy.lock().contains(&target.address);
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(GuardError::HealthCheck {
                    node: target.address.clone(),
                    reason: "scripted down".into(),
                })
            }
        })
    }
}

pub struct Harness {
    pub prober: Arc<ScriptedProber>,
    pub registry: Arc<DegradeRegistry<String>>,
    pub rb: Rebalancer<String>,
}

/// Rebalancer for service `orders` with default settings and a scripted prober.
pub fn harness() -> Harness {
    harness_with(DegradeOpts::default())
}

pub fn harness_with(opts: DegradeOpts) -> Harness {
    let prober = Arc::new(ScriptedProber::default());
    let registry = Arc::new(DegradeRegistry::new(Arc::new(HotSwap::new(opts)), prober.clone()));
    let rb = Rebalancer::builder("orders", registry.clone()).build().unwrap();
    Harness { prober, registry, rb }
}

/// Start a mock HTTP backend answering every request with `status`.
pub async fn start_mock_backend(addr: SocketAddr, status: u16) {
    start_programmable_backend(addr, move || async move { (status, "ok".to_string()) }).await;
}

/// Start a programmable mock HTTP backend.
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            204 => "204 No Content",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

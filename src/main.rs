//! upstream-guard daemon.
//!
//! ```text
//!   guard.toml ──▶ loader ──▶ HotSwap<BreakerSettings / BalancerConfig / DegradeOpts>
//!        │                                   │
//!     watcher                                ▼
//!        │          StaticDiscovery ──▶ Rebalancer (per service) ──▶ DegradeController
//!        └──────────▶ re-push ──────────────┘        │                     │
//!                                                    ▼                     ▼
//!                                             BreakerStates          health probes
//!                                                    │
//!                                              admin API / metrics
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dashmap::DashMap;
use tokio::net::TcpListener;

use upstream_guard::admin::{setup_admin_router, AdminState, Balancers};
use upstream_guard::config::loader::load_config;
use upstream_guard::config::watcher::ConfigWatcher;
use upstream_guard::config::{BalancerConfig, BreakerSettings, GuardConfig, HotSwap};
use upstream_guard::degrade::DegradeRegistry;
use upstream_guard::discovery::StaticDiscovery;
use upstream_guard::health::NetProber;
use upstream_guard::lifecycle::Shutdown;
use upstream_guard::load_balancer::Rebalancer;
use upstream_guard::observability::{logging, metrics, BreakerStates};

#[derive(Parser)]
#[command(name = "upstream-guard")]
#[command(about = "Client-side node selection with circuit breaking and discovery self-protection")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "guard.toml")]
    config: PathBuf,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,
}

/// Everything needed to keep one rebalancer per configured service.
struct Services {
    registry: Arc<DegradeRegistry<String>>,
    breaker_settings: Arc<HotSwap<BreakerSettings>>,
    balancer: Arc<HotSwap<BalancerConfig>>,
    breakers: Arc<BreakerStates>,
    balancers: Arc<Balancers>,
}

impl Services {
    /// Create missing rebalancers, drop removed ones, and push every list.
    fn sync(&self, discovery: &StaticDiscovery) {
        let names = discovery.service_names();
        let wanted: HashSet<&String> = names.iter().collect();

        let removed: Vec<String> = self
            .balancers
            .iter()
            .filter(|e| !wanted.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for service in removed {
            self.balancers.remove(&service);
            self.registry.remove(&service);
            self.breakers.retain_nodes(&service, &HashSet::new());
            tracing::info!(service = %service, "Service removed");
        }

        for service in &names {
            let rb = match self.balancers.get(service) {
                Some(existing) => existing.clone(),
                None => {
                    let built = Rebalancer::builder(service.clone(), self.registry.clone())
                        .breaker_settings(self.breaker_settings.clone())
                        .balancer(self.balancer.clone())
                        .breaker_states(self.breakers.clone())
                        .build();
                    match built {
                        Ok(rb) => {
                            let rb = Arc::new(rb);
                            self.balancers.insert(service.clone(), rb.clone());
                            tracing::info!(service = %service, "Service added");
                            rb
                        }
                        Err(e) => {
                            tracing::error!(service = %service, error = %e, "Failed to build rebalancer");
                            continue;
                        }
                    }
                }
            };
            // Lookup errors are logged by refresh and keep the applied list.
            let _ = rb.refresh(discovery);
        }
    }

    fn apply_config(&self, config: &GuardConfig) {
        if self.breaker_settings.load().value != config.breaker {
            let version = self.breaker_settings.store(config.breaker.clone());
            tracing::info!(version, "Breaker settings updated");
        }
        if self.balancer.load().value != config.balancer {
            let version = self.balancer.store(config.balancer.clone());
            tracing::info!(version, "Balancer settings updated");
        }
        if self.registry.opts().load().value != config.degrade {
            self.registry.update_opts(config.degrade.clone());
        }
        self.sync(&StaticDiscovery::from_config(&config.services));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        services = config.services.len(),
        "upstream-guard starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = Arc::new(Services {
        registry: Arc::new(DegradeRegistry::new(
            Arc::new(HotSwap::new(config.degrade.clone())),
            Arc::new(NetProber::new()),
        )),
        breaker_settings: Arc::new(HotSwap::new(config.breaker.clone())),
        balancer: Arc::new(HotSwap::new(config.balancer.clone())),
        breakers: Arc::new(BreakerStates::new()),
        balancers: Arc::new(DashMap::new()),
    });
    services.sync(&StaticDiscovery::from_config(&config.services));

    let shutdown = Arc::new(Shutdown::new());
    let mut tasks = Vec::new();

    // Keep the watcher alive for the life of the process.
    let mut _watcher = None;
    if !args.no_watch {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(w) => {
                _watcher = Some(w);
                let services = services.clone();
                let mut stop = shutdown.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            Some(next) = updates.recv() => services.apply_config(&next),
                            _ = stop.recv() => break,
                        }
                    }
                }));
            }
            Err(e) => tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled"),
        }
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState {
            registry: services.registry.clone(),
            balancers: services.balancers.clone(),
            breakers: services.breakers.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    shutdown.wait_for_signal().await;
    services.registry.shutdown();
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

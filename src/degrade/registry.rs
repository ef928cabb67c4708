//! Controllers keyed by service name, sharing one options holder.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::config::{DegradeOpts, HotSwap};
use crate::degrade::controller::{ApplyFn, ControllerStatus, DegradeController};
use crate::discovery::Node;
use crate::health::HealthProber;

pub struct DegradeRegistry<P> {
    opts: Arc<HotSwap<DegradeOpts>>,
    prober: Arc<dyn HealthProber>,
    runtime: Option<Handle>,
    controllers: DashMap<String, Arc<DegradeController<P>>>,
}

impl<P: Clone + Send + Sync + 'static> DegradeRegistry<P> {
    /// Health loops are spawned on the runtime current at construction,
    /// falling back to the caller's runtime.
    pub fn new(opts: Arc<HotSwap<DegradeOpts>>, prober: Arc<dyn HealthProber>) -> Self {
        Self {
            opts,
            prober,
            runtime: Handle::try_current().ok(),
            controllers: DashMap::new(),
        }
    }

    /// Controller for `service`, created on first use.
    pub fn controller(&self, service: &str) -> Arc<DegradeController<P>> {
        if let Some(existing) = self.controllers.get(service) {
            return existing.clone();
        }
        self.controllers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(DegradeController::new(
                    service,
                    self.opts.clone(),
                    self.prober.clone(),
                    self.runtime.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, service: &str) -> Option<Arc<DegradeController<P>>> {
        self.controllers.get(service).map(|c| c.clone())
    }

    /// Drop the controller of a service that is gone, cancelling its loop.
    pub fn remove(&self, service: &str) -> bool {
        match self.controllers.remove(service) {
            Some((_, controller)) => {
                controller.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn update_list(&self, service: &str, nodes: Vec<Node<P>>, on_apply: ApplyFn<P>) {
        self.controller(service).update_list(nodes, on_apply);
    }

    /// Swap the options. Disabling forces every service back to Normal.
    pub fn update_opts(&self, opts: DegradeOpts) -> u64 {
        let disable = !opts.enabled;
        let version = self.opts.store(opts);
        if disable {
            for controller in self.all() {
                controller.force_normal();
            }
            tracing::info!(version, "Degrade protection disabled");
        } else {
            tracing::info!(version, "Degrade options updated");
        }
        version
    }

    pub fn opts(&self) -> Arc<HotSwap<DegradeOpts>> {
        self.opts.clone()
    }

    /// Cancel every health loop.
    pub fn shutdown(&self) {
        for controller in self.all() {
            controller.shutdown();
        }
    }

    pub fn statuses(&self) -> Vec<ControllerStatus> {
        let mut out: Vec<ControllerStatus> = self.all().iter().map(|c| c.status()).collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    fn all(&self) -> Vec<Arc<DegradeController<P>>> {
        self.controllers.iter().map(|r| r.value().clone()).collect()
    }
}

//! Per-service degrade controller.
//!
//! # Responsibilities
//! - Decide whether a pushed node list is trusted (Normal) or held back
//!   (SelfProtection / Panic)
//! - Keep the `recent` and `stable` history windows
//! - Run the cancellable health-check loop while degraded
//!
//! # Ratio bases
//! ```text
//! Normal → SelfProtection   (online + flap_slack) / |newest recent|  < threshold
//!                           online / |oldest stable|                 < panic_threshold
//! SelfProtection → Panic    healthy / |oldest stable|                < panic_threshold
//! Panic → SelfProtection    healthy / |oldest stable|               >= threshold
//! ```
//! An empty basis counts as ratio 1.0.
//!
//! The controller never references the rebalancer: each push hands in the
//! apply callback, which is kept for the health loop.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{DegradeOpts, HotSwap};
use crate::degrade::history::HistoryWindow;
use crate::degrade::state::ServiceState;
use crate::discovery::node::{same_members, union_by_address};
use crate::discovery::Node;
use crate::health::{HealthProber, ProbeTarget};
use crate::observability::metrics;

/// `(nodes, is_panic)`: install `nodes` as the serving table.
pub type ApplyFn<P> = Arc<dyn Fn(&[Node<P>], bool) + Send + Sync>;

/// Read-only view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub service: String,
    pub state: ServiceState,
    pub applied_nodes: usize,
    pub latest_nodes: usize,
    pub recent_snapshots: usize,
    pub stable_snapshots: usize,
    /// Size of the newest `recent` snapshot.
    pub recent_baseline: usize,
    /// Size of the oldest `stable` snapshot.
    pub stable_baseline: usize,
    pub degraded_for_secs: Option<f64>,
    pub probing: bool,
}

struct ProbeLoop {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

struct Inner<P> {
    state: ServiceState,
    recent: HistoryWindow<P>,
    stable: HistoryWindow<P>,
    latest: Arc<Vec<Node<P>>>,
    applied: Arc<Vec<Node<P>>>,
    applied_panic: bool,
    on_apply: Option<ApplyFn<P>>,
    degraded_since: Option<Instant>,
    probe_loop: Option<ProbeLoop>,
}

impl<P> Inner<P> {
    fn apply(&mut self, nodes: Arc<Vec<Node<P>>>, panic: bool) {
        self.applied = nodes;
        self.applied_panic = panic;
        if let Some(on_apply) = &self.on_apply {
            on_apply(self.applied.as_slice(), panic);
        }
    }

    fn cancel_loop(&mut self) {
        if let Some(probe_loop) = self.probe_loop.take() {
            probe_loop.token.cancel();
        }
    }
}

fn ratio(count: usize, basis: usize) -> f64 {
    if basis == 0 {
        1.0
    } else {
        count as f64 / basis as f64
    }
}

/// Degrade state machine for one service.
pub struct DegradeController<P> {
    service: String,
    opts: Arc<HotSwap<DegradeOpts>>,
    prober: Arc<dyn HealthProber>,
    runtime: Option<Handle>,
    inner: Mutex<Inner<P>>,
}

impl<P: Clone + Send + Sync + 'static> DegradeController<P> {
    pub fn new(
        service: impl Into<String>,
        opts: Arc<HotSwap<DegradeOpts>>,
        prober: Arc<dyn HealthProber>,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            service: service.into(),
            opts,
            prober,
            runtime,
            inner: Mutex::new(Inner {
                state: ServiceState::Normal,
                recent: HistoryWindow::new(),
                stable: HistoryWindow::new(),
                latest: Arc::new(Vec::new()),
                applied: Arc::new(Vec::new()),
                applied_panic: false,
                on_apply: None,
                degraded_since: None,
                probe_loop: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> ServiceState {
        self.inner.lock().state
    }

    /// Accept, hold back or escalate a pushed node list.
    pub fn update_list(self: &Arc<Self>, nodes: Vec<Node<P>>, on_apply: ApplyFn<P>) {
        let snapshot = self.opts.load();
        let opts = &snapshot.value;
        let now = Instant::now();

        let total = nodes.len();
        let mut seen = HashSet::new();
        let online: Arc<Vec<Node<P>>> = Arc::new(
            nodes
                .into_iter()
                .filter(|n| !n.is_offline)
                .filter(|n| seen.insert(n.address.clone()))
                .collect(),
        );

        let mut inner = self.inner.lock();
        inner.on_apply = Some(on_apply);
        inner.latest = online.clone();

        if !opts.enabled {
            if inner.state.is_degraded() {
                self.leave_degraded(&mut inner, "protection disabled");
            }
            inner.apply(online, false);
            return;
        }

        if inner.state.is_degraded() {
            let applied = inner.applied.clone();
            let panic = inner.applied_panic;
            inner.apply(applied, panic);
            tracing::debug!(
                service = %self.service,
                state = %inner.state,
                online = online.len(),
                "Push held while degraded"
            );
            return;
        }

        inner.recent.prune(now, opts.contrast_interval());
        inner.stable.prune(now, opts.contrast_interval());
        let recent_basis = inner.recent.latest().map(|l| l.len()).unwrap_or(0);
        let stable_basis = inner.stable.oldest().map(|l| l.len()).unwrap_or(0);
        let online_ratio = ratio(online.len() + opts.flap_slack, recent_basis);
        let stable_ratio = ratio(online.len(), stable_basis);

        if online_ratio < opts.threshold || stable_ratio < opts.panic_threshold {
            if self.start_loop(&mut inner) {
                inner.state = ServiceState::SelfProtection;
                inner.degraded_since = Some(now);
                metrics::record_service_state(&self.service, inner.state, Duration::ZERO);
                tracing::warn!(
                    service = %self.service,
                    online = online.len(),
                    offline = total - online.len(),
                    recent = recent_basis,
                    stable = stable_basis,
                    "Node list shrank, entering self-protection"
                );
                return;
            }
            tracing::error!(
                service = %self.service,
                online = online.len(),
                "No runtime for health checks, accepting shrunken node list"
            );
        }

        inner.recent.append(online.clone(), now, opts.save_interval());
        inner.stable.append(online.clone(), now, opts.save_interval());
        inner.apply(online, false);
    }

    /// Force Normal with the applied list, without touching history.
    pub fn force_normal(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_loop();
        if inner.state.is_degraded() {
            tracing::info!(service = %self.service, from = %inner.state, "Forced back to normal");
            inner.state = ServiceState::Normal;
            inner.degraded_since = None;
            metrics::record_service_state(&self.service, inner.state, Duration::ZERO);
        }
        let applied = inner.applied.clone();
        inner.apply(applied, false);
    }

    /// Stop the health loop, if any. State is left as is.
    pub fn shutdown(&self) {
        self.inner.lock().cancel_loop();
    }

    pub fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock();
        ControllerStatus {
            service: self.service.clone(),
            state: inner.state,
            applied_nodes: inner.applied.len(),
            latest_nodes: inner.latest.len(),
            recent_snapshots: inner.recent.len(),
            stable_snapshots: inner.stable.len(),
            recent_baseline: inner.recent.latest().map(|l| l.len()).unwrap_or(0),
            stable_baseline: inner.stable.oldest().map(|l| l.len()).unwrap_or(0),
            degraded_for_secs: inner.degraded_since.map(|t| t.elapsed().as_secs_f64()),
            probing: inner.probe_loop.is_some(),
        }
    }

    /// The list currently installed through the apply callback.
    pub fn applied(&self) -> Arc<Vec<Node<P>>> {
        self.inner.lock().applied.clone()
    }

    fn start_loop(self: &Arc<Self>, inner: &mut Inner<P>) -> bool {
        let Some(handle) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            return false;
        };
        inner.cancel_loop();
        let token = CancellationToken::new();
        let task = handle.spawn(health_loop(Arc::downgrade(self), token.clone()));
        inner.probe_loop = Some(ProbeLoop { token, _task: task });
        true
    }

    /// Back to Normal with the latest discovery list.
    fn exit_to_normal(&self, inner: &mut Inner<P>, now: Instant, reason: &str) {
        let opts = self.opts.load();
        let latest = inner.latest.clone();
        inner.recent.reset(latest.clone(), now);
        inner.stable.append(latest.clone(), now, opts.value.save_interval());
        self.leave_degraded(inner, reason);
        inner.apply(latest, false);
    }

    fn leave_degraded(&self, inner: &mut Inner<P>, reason: &str) {
        tracing::info!(service = %self.service, from = %inner.state, reason, "Service back to normal");
        inner.state = ServiceState::Normal;
        inner.degraded_since = None;
        inner.cancel_loop();
        metrics::record_service_state(&self.service, inner.state, Duration::ZERO);
    }

    /// Nodes to probe and the cycle timing, or `None` once back to Normal.
    fn probe_plan(&self) -> Option<(Vec<Node<P>>, Duration, Duration)> {
        let opts = self.opts.load();
        let inner = self.inner.lock();
        if !inner.state.is_degraded() {
            return None;
        }
        let mut lists: Vec<&[Node<P>]> = vec![inner.latest.as_slice()];
        if let Some(recent) = inner.recent.latest() {
            lists.push(recent.as_slice());
        }
        let candidates = union_by_address(&lists);
        let interval = candidates
            .iter()
            .filter_map(|n| n.health_check.as_ref().and_then(|s| s.interval()))
            .fold(opts.value.health_check_interval(), Duration::min);
        Some((candidates, opts.value.ping_timeout(), interval))
    }

    async fn probe_all(&self, candidates: Vec<Node<P>>, default_timeout: Duration) -> Vec<Node<P>> {
        let checks = candidates.into_iter().map(|node| async move {
            let target = ProbeTarget::from_node(&node);
            let timeout = target.timeout_or(default_timeout);
            let healthy = matches!(
                tokio::time::timeout(timeout, self.prober.probe(&target, timeout)).await,
                Ok(Ok(()))
            );
            metrics::record_health_check(&self.service, healthy);
            (node, healthy)
        });
        let results = join_all(checks).await;
        let probed = results.len();
        let healthy: Vec<Node<P>> = results.into_iter().filter(|(_, ok)| *ok).map(|(n, _)| n).collect();
        if healthy.len() < probed {
            tracing::warn!(
                service = %self.service,
                probed,
                healthy = healthy.len(),
                "Health check cycle found unhealthy nodes"
            );
        }
        healthy
    }

    /// Apply one cycle's result. Returns false when the loop should stop.
    fn evaluate(&self, healthy: Vec<Node<P>>) -> bool {
        let snapshot = self.opts.load();
        let opts = &snapshot.value;
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let degraded_for = match inner.degraded_since {
            Some(since) => now.saturating_duration_since(since),
            None => return false,
        };
        let stable_basis = inner.stable.oldest().map(|l| l.len()).unwrap_or(0);
        let healthy_ratio = ratio(healthy.len(), stable_basis);
        let healthy = Arc::new(healthy);

        let current = inner.state;
        match current {
            ServiceState::Normal => return false,
            ServiceState::SelfProtection => {
                if degraded_for >= opts.self_protection_max() {
                    self.exit_to_normal(&mut inner, now, "self-protection max time reached");
                    return false;
                }
                if healthy_ratio < opts.panic_threshold {
                    let fallback = inner.stable.oldest().cloned().unwrap_or_else(|| inner.applied.clone());
                    inner.state = ServiceState::Panic;
                    tracing::warn!(
                        service = %self.service,
                        healthy = healthy.len(),
                        stable = stable_basis,
                        "Too few healthy nodes, entering panic"
                    );
                    inner.apply(fallback, true);
                } else if same_members(healthy.as_slice(), inner.latest.as_slice()) {
                    self.exit_to_normal(&mut inner, now, "healthy set matches discovery");
                    return false;
                } else if !healthy.is_empty()
                    && (inner.applied_panic || !same_members(healthy.as_slice(), inner.applied.as_slice()))
                {
                    tracing::info!(service = %self.service, healthy = healthy.len(), "Serving probed healthy set");
                    inner.apply(healthy, false);
                }
            }
            ServiceState::Panic => {
                if healthy_ratio >= opts.threshold {
                    inner.state = ServiceState::SelfProtection;
                    tracing::info!(
                        service = %self.service,
                        healthy = healthy.len(),
                        stable = stable_basis,
                        "Healthy nodes recovered, leaving panic"
                    );
                    if !healthy.is_empty() {
                        inner.apply(healthy, false);
                    }
                }
            }
        }

        metrics::record_service_state(&self.service, inner.state, degraded_for);
        true
    }
}

impl<P> Drop for DegradeController<P> {
    fn drop(&mut self) {
        if let Some(probe_loop) = self.inner.get_mut().probe_loop.take() {
            probe_loop.token.cancel();
        }
    }
}

async fn health_loop<P: Clone + Send + Sync + 'static>(
    controller: Weak<DegradeController<P>>,
    token: CancellationToken,
) {
    loop {
        let Some(ctrl) = controller.upgrade() else {
            return;
        };
        let Some((candidates, timeout, interval)) = ctrl.probe_plan() else {
            return;
        };

        let healthy = tokio::select! {
            _ = token.cancelled() => return,
            healthy = ctrl.probe_all(candidates, timeout) => healthy,
        };
        if token.is_cancelled() || !ctrl.evaluate(healthy) {
            return;
        }
        drop(ctrl);

        let jitter_ms = (interval.as_millis() / 10) as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval + jitter) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardResult;
    use futures_util::future::BoxFuture;

    /// Healthy iff the address is in the set.
    struct ScriptedProber {
        healthy: Mutex<HashSet<String>>,
    }

    impl HealthProber for ScriptedProber {
        fn probe<'a>(&'a self, target: &'a ProbeTarget, _timeout: Duration) -> BoxFuture<'a, GuardResult<()>> {
            let ok = self.healthy.lock().contains(&target.address);
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(crate::error::GuardError::HealthCheck {
                        node: target.address.clone(),
                        reason: "scripted".into(),
                    })
                }
            })
        }
    }

    fn nodes(range: std::ops::Range<u16>) -> Vec<Node<u16>> {
        range.map(|i| Node::new("10.0.0.1", 9000 + i, 1, i)).collect()
    }

    fn recorder() -> (ApplyFn<u16>, Arc<Mutex<Vec<(usize, bool)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        let f: ApplyFn<u16> = Arc::new(move |nodes: &[Node<u16>], panic: bool| c.lock().push((nodes.len(), panic)));
        (f, calls)
    }

    fn controller(healthy: &[Node<u16>]) -> Arc<DegradeController<u16>> {
        let prober = ScriptedProber {
            healthy: Mutex::new(healthy.iter().map(|n| n.address.clone()).collect()),
        };
        Arc::new(DegradeController::new(
            "orders",
            Arc::new(HotSwap::new(DegradeOpts::default())),
            Arc::new(prober),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_nodes_do_not_count() {
        let ctrl = controller(&[]);
        let (apply, calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());

        let mut list = nodes(0..10);
        for n in list.iter_mut().take(3) {
            n.is_offline = true;
        }
        // (7 + 1) / 10 = 0.8, not below the threshold.
        ctrl.update_list(list, apply);
        assert_eq!(ctrl.state(), ServiceState::Normal);
        assert_eq!(calls.lock().last(), Some(&(7, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_push_reapplies_held_list() {
        let ctrl = controller(&nodes(0..10));
        let (apply, calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());
        ctrl.update_list(nodes(0..2), apply.clone());
        assert_eq!(ctrl.state(), ServiceState::SelfProtection);

        // Another shrunken push re-applies the held list and is not evaluated.
        ctrl.update_list(nodes(0..1), apply);
        assert_eq!(calls.lock().as_slice(), &[(10, false), (10, false)]);
        assert_eq!(ctrl.status().latest_nodes, 1);
        assert!(ctrl.status().probing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_time_forces_normal() {
        // Nodes 0 and 1 pass: no exact match and no panic.
        let ctrl = controller(&nodes(0..2));
        let (apply, calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());
        ctrl.update_list(nodes(1..4), apply);
        assert_eq!(ctrl.state(), ServiceState::SelfProtection);

        tokio::time::sleep(Duration::from_secs(24 * 60 * 60 + 120)).await;
        assert_eq!(ctrl.state(), ServiceState::Normal);
        assert_eq!(calls.lock().last(), Some(&(3, false)));
        assert!(!ctrl.status().probing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_normal_cancels_loop() {
        let ctrl = controller(&[]);
        let (apply, _calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());
        ctrl.update_list(nodes(0..2), apply);
        assert!(ctrl.status().probing);

        ctrl.force_normal();
        assert_eq!(ctrl.state(), ServiceState::Normal);
        assert!(!ctrl.status().probing);
        assert_eq!(ctrl.applied().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_addresses_collapse() {
        let ctrl = controller(&nodes(0..2));
        let (apply, calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());

        let mut list = nodes(0..2);
        list.push(nodes(1..2).remove(0));
        ctrl.update_list(list, apply);
        assert_eq!(ctrl.state(), ServiceState::SelfProtection);
        assert_eq!(ctrl.status().latest_nodes, 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ctrl.state(), ServiceState::Normal);
        assert_eq!(calls.lock().last(), Some(&(2, false)));
    }

    #[test]
    fn test_without_runtime_push_is_accepted() {
        let ctrl = controller(&[]);
        let (apply, calls) = recorder();
        ctrl.update_list(nodes(0..10), apply.clone());
        ctrl.update_list(nodes(0..2), apply);
        assert_eq!(ctrl.state(), ServiceState::Normal);
        assert_eq!(calls.lock().last(), Some(&(2, false)));
    }
}

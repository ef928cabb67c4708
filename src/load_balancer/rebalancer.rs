//! Rebalancer: node table + picker + per-node breakers.
//!
//! # Responsibilities
//! - Keep one node table generation per service, swapped atomically on reload
//! - Delegate selection to the configured weighted picker
//! - Feed call outcomes into node breakers and turn breaker transitions into
//!   weight changes
//! - Veto breaker trips that would leave too few healthy nodes
//!
//! # Weight lifecycle
//! ```text
//! Closed            curWeight = origWeight
//! → Open            curWeight = 0, re-arm scheduled after fallback
//! re-arm fires      ramp reset, curWeight = 1
//! Half-Open         curWeight = ramp(origWeight) before each recorded outcome
//! → Closed          curWeight = origWeight
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::{BalancerConfig, BreakerSettings, HotSwap};
use crate::degrade::{ApplyFn, DegradeRegistry};
use crate::discovery::{Discovery, Node};
use crate::error::{GuardError, GuardResult};
use crate::load_balancer::classify::{self, StatusClassifier};
use crate::load_balancer::node::RbNode;
use crate::load_balancer::picker::{PickerFactory, PickerKind, WeightedPicker};
use crate::observability::BreakerStates;
use crate::resilience::{BreakerState, CircuitBreaker, ReadyToTrip};

/// Per-node view returned by [`Rebalancer::snapshot`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: String,
    pub orig_weight: u32,
    pub cur_weight: u32,
    pub breaker: Option<&'static str>,
}

struct Context<P> {
    service: String,
    breaker_settings: Arc<HotSwap<BreakerSettings>>,
    balancer: Arc<HotSwap<BalancerConfig>>,
    ready_to_trip: Option<ReadyToTrip>,
    breaker_states: Arc<BreakerStates>,
    picker: PickerFactory<P>,
    classifier: StatusClassifier,
    runtime: Option<Handle>,
}

/// One generation of the node table and its picker.
struct Table<P> {
    me: Weak<Table<P>>,
    ctx: Arc<Context<P>>,
    panic: bool,
    nodes: RwLock<HashMap<String, Arc<RbNode<P>>>>,
    picker: Mutex<Box<dyn WeightedPicker<P>>>,
}

impl<P: Clone + PartialEq + Send + Sync + 'static> Table<P> {
    fn build(ctx: Arc<Context<P>>, entries: Vec<(String, u32, P)>, panic: bool) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Table<P>>| {
            let mut picker = (ctx.picker)();
            let mut nodes = HashMap::new();
            for (id, weight, payload) in entries {
                match build_node(&ctx, me, id.clone(), weight, payload, !panic) {
                    Ok(node) => {
                        picker.upsert(&id, weight, node.payload().clone());
                        nodes.insert(id, Arc::new(node));
                    }
                    Err(e) => tracing::warn!(service = %ctx.service, node = %id, error = %e, "Skipping node"),
                }
            }
            Table {
                me: me.clone(),
                ctx: ctx.clone(),
                panic,
                nodes: RwLock::new(nodes),
                picker: Mutex::new(picker),
            }
        })
    }

    fn node(&self, id: &str) -> Option<Arc<RbNode<P>>> {
        self.nodes.read().get(id).cloned()
    }

    fn same_as(&self, entries: &[(String, u32, P)], panic: bool) -> bool {
        if self.panic != panic {
            return false;
        }
        let nodes = self.nodes.read();
        nodes.len() == entries.len()
            && entries.iter().all(|(id, weight, payload)| {
                nodes
                    .get(id)
                    .map(|n| n.orig_weight() == *weight && n.payload() == payload)
                    .unwrap_or(false)
            })
    }

    fn upsert(&self, id: &str, weight: u32, payload: P) -> GuardResult<()> {
        if id.trim().is_empty() {
            return Err(GuardError::Argument("node id must not be empty".into()));
        }
        let node = Arc::new(build_node(&self.ctx, &self.me, id.to_string(), weight, payload, !self.panic)?);

        let mut nodes = self.nodes.write();
        self.picker.lock().upsert(id, weight, node.payload().clone());
        if node.breaker().is_some() {
            self.ctx.breaker_states.set(&self.ctx.service, id, BreakerState::Closed);
        }
        nodes.insert(id.to_string(), node);
        Ok(())
    }

    fn next(&self) -> Option<P> {
        self.picker.lock().next()
    }

    fn apply_weight(&self, node: &RbNode<P>, weight: u32) {
        let weight = node.set_cur_weight(weight);
        self.picker.lock().upsert(node.id(), weight, node.payload().clone());
    }

    fn is_intercept_change(&self, id: &str, _from: BreakerState, to: BreakerState) -> bool {
        if to != BreakerState::Open {
            return false;
        }
        let nodes = self.nodes.read();
        let total = nodes.len();
        if total < 2 {
            return true;
        }
        let closed = nodes
            .values()
            .filter(|n| n.id() != id && n.breaker_state() == Some(BreakerState::Closed))
            .count();
        let healthy = closed as f64 / total as f64;
        let required = self.ctx.balancer.load().value.healthy_node_percent;
        if healthy < required {
            tracing::info!(
                service = %self.ctx.service,
                node = %id,
                healthy_ratio = healthy,
                required,
                "Too few healthy nodes, keeping breaker closed"
            );
            return true;
        }
        false
    }

    fn on_state_change(&self, id: &str, _from: BreakerState, to: BreakerState) {
        self.ctx.breaker_states.set(&self.ctx.service, id, to);
        let Some(node) = self.node(id) else {
            return;
        };
        match to {
            BreakerState::Open => {
                let episode = node.begin_open_episode();
                self.apply_weight(&node, 0);
                self.schedule_rearm(&node, episode);
            }
            BreakerState::Closed => self.apply_weight(&node, node.orig_weight()),
            BreakerState::HalfOpen => {}
        }
    }

    /// After the fallback duration, reset the ramp and give the node a
    /// weight of 1 so it receives probe traffic.
    fn schedule_rearm(&self, node: &Arc<RbNode<P>>, episode: u64) {
        let handle = match self.ctx.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(h) => h,
            None => {
                tracing::warn!(node = %node.id(), "No runtime available, breaker re-arm skipped");
                return;
            }
        };
        let fallback = self.ctx.breaker_settings.load().value.fallback();
        let token = node.rearm_token();
        let table = self.me.clone();
        let weak_node = Arc::downgrade(node);

        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(fallback) => {
                    let (Some(table), Some(node)) = (table.upgrade(), weak_node.upgrade()) else {
                        return;
                    };
                    if node.open_episode() != episode
                        || node.breaker_state() == Some(BreakerState::Closed)
                    {
                        return;
                    }
                    node.ramp().reset();
                    table.apply_weight(&node, 1);
                    tracing::debug!(service = %table.ctx.service, node = %node.id(), "Breaker re-armed with probe weight");
                }
            }
        });
    }

    fn snapshot(&self) -> Vec<NodeStatus> {
        let mut out: Vec<NodeStatus> = self
            .nodes
            .read()
            .values()
            .map(|n| NodeStatus {
                address: n.id().to_string(),
                orig_weight: n.orig_weight(),
                cur_weight: n.cur_weight(),
                breaker: n.breaker_state().map(|s| s.as_str()),
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }
}

fn build_node<P: Clone + PartialEq + Send + Sync + 'static>(
    ctx: &Arc<Context<P>>,
    table: &Weak<Table<P>>,
    id: String,
    weight: u32,
    payload: P,
    with_breaker: bool,
) -> GuardResult<RbNode<P>> {
    if !with_breaker {
        return Ok(RbNode::new(id, weight, payload, None));
    }

    let intercept_table = table.clone();
    let listener_table = table.clone();
    let mut builder = CircuitBreaker::builder(id.clone(), ctx.breaker_settings.clone())
        .service(ctx.service.clone())
        .interceptor(Arc::new(move |id: &str, from: BreakerState, to: BreakerState| match intercept_table.upgrade() {
            Some(t) => t.is_intercept_change(id, from, to),
            // Decommissioned generation.
            None => true,
        }))
        .on_state_change(Arc::new(move |id: &str, from: BreakerState, to: BreakerState| {
            if let Some(t) = listener_table.upgrade() {
                t.on_state_change(id, from, to);
            }
        }));
    if let Some(policy) = &ctx.ready_to_trip {
        builder = builder.ready_to_trip(policy.clone());
    }
    Ok(RbNode::new(id, weight, payload, Some(builder.build()?)))
}

struct Shared<P> {
    ctx: Arc<Context<P>>,
    table: ArcSwap<Table<P>>,
    degrade: Arc<DegradeRegistry<P>>,
}

impl<P: Clone + PartialEq + Send + Sync + 'static> Shared<P> {
    fn apply(&self, nodes: &[Node<P>], panic: bool) {
        let mut seen = HashSet::new();
        let entries: Vec<(String, u32, P)> = nodes
            .iter()
            .filter(|n| !n.is_offline && !n.address.is_empty())
            .filter(|n| seen.insert(n.address.clone()))
            .map(|n| (n.address.clone(), n.weight, n.payload.clone()))
            .collect();

        if self.table.load().same_as(&entries, panic) {
            tracing::trace!(service = %self.ctx.service, "Node list unchanged");
            return;
        }

        let table = Table::build(self.ctx.clone(), entries, panic);
        let keep: HashSet<String> = table.nodes.read().keys().cloned().collect();
        let count = keep.len();
        self.table.store(table);

        if panic {
            // Panic tables carry no breakers.
            self.ctx.breaker_states.clear_service(&self.ctx.service);
        } else {
            self.ctx.breaker_states.retain_nodes(&self.ctx.service, &keep);
            for address in &keep {
                self.ctx.breaker_states.set(&self.ctx.service, address, BreakerState::Closed);
            }
        }
        tracing::info!(service = %self.ctx.service, nodes = count, panic, "Node table swapped");
    }
}

/// Builder for [`Rebalancer`].
pub struct RebalancerBuilder<P> {
    service: String,
    degrade: Arc<DegradeRegistry<P>>,
    breaker_settings: Arc<HotSwap<BreakerSettings>>,
    balancer: Arc<HotSwap<BalancerConfig>>,
    picker: Option<PickerFactory<P>>,
    classifier: Option<StatusClassifier>,
    ready_to_trip: Option<ReadyToTrip>,
    breaker_states: Arc<BreakerStates>,
}

impl<P: Clone + PartialEq + Send + Sync + 'static> RebalancerBuilder<P> {
    pub fn breaker_settings(mut self, settings: Arc<HotSwap<BreakerSettings>>) -> Self {
        self.breaker_settings = settings;
        self
    }

    pub fn balancer(mut self, config: Arc<HotSwap<BalancerConfig>>) -> Self {
        self.balancer = config;
        self
    }

    /// Override the picker named in the balancer config.
    pub fn picker(mut self, factory: PickerFactory<P>) -> Self {
        self.picker = Some(factory);
        self
    }

    /// Override the status classifier (true = failure).
    pub fn classifier(mut self, classifier: StatusClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn ready_to_trip(mut self, policy: ReadyToTrip) -> Self {
        self.ready_to_trip = Some(policy);
        self
    }

    pub fn breaker_states(mut self, states: Arc<BreakerStates>) -> Self {
        self.breaker_states = states;
        self
    }

    pub fn build(self) -> GuardResult<Rebalancer<P>> {
        if self.service.trim().is_empty() {
            return Err(GuardError::Argument("service name must not be empty".into()));
        }
        let balancer = self.balancer.load();
        let picker = match self.picker {
            Some(factory) => factory,
            None => balancer.value.picker.parse::<PickerKind>()?.factory(),
        };
        let classifier = match self.classifier {
            Some(c) => c,
            None => match &balancer.value.failure_status_codes {
                Some(codes) => classify::from_codes(codes.clone()),
                None => classify::default_classifier(),
            },
        };

        let ctx = Arc::new(Context {
            service: self.service,
            breaker_settings: self.breaker_settings,
            balancer: self.balancer.clone(),
            ready_to_trip: self.ready_to_trip,
            breaker_states: self.breaker_states,
            picker,
            classifier,
            runtime: Handle::try_current().ok(),
        });
        let table = Table::build(ctx.clone(), Vec::new(), false);

        Ok(Rebalancer {
            shared: Arc::new(Shared {
                ctx,
                table: ArcSwap::new(table),
                degrade: self.degrade,
            }),
        })
    }
}

/// Client-side balancer for one service.
pub struct Rebalancer<P> {
    shared: Arc<Shared<P>>,
}

impl<P: Clone + PartialEq + Send + Sync + 'static> Rebalancer<P> {
    pub fn builder(service: impl Into<String>, degrade: Arc<DegradeRegistry<P>>) -> RebalancerBuilder<P> {
        RebalancerBuilder {
            service: service.into(),
            degrade,
            breaker_settings: Arc::new(HotSwap::default()),
            balancer: Arc::new(HotSwap::default()),
            picker: None,
            classifier: None,
            ready_to_trip: None,
            breaker_states: Arc::new(BreakerStates::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.shared.ctx.service
    }

    /// Insert or replace one node with a fresh breaker and ramp.
    pub fn upsert(&self, id: &str, weight: u32, payload: P) -> GuardResult<()> {
        self.shared.table.load().upsert(id, weight, payload)
    }

    /// Pick a node. Fails only when the table is empty.
    pub fn next(&self) -> GuardResult<P> {
        self.shared
            .table
            .load()
            .next()
            .ok_or_else(|| GuardError::NotFound(self.shared.ctx.service.clone()))
    }

    /// Report the outcome of a call to `address`.
    pub fn record_metrics(&self, address: &str, status_code: u16) {
        let table = self.shared.table.load_full();
        let Some(node) = table.node(address) else {
            tracing::trace!(service = %self.shared.ctx.service, node = %address, "Outcome for unknown node");
            return;
        };
        let Some(breaker) = node.breaker() else {
            return;
        };
        let failure = (self.shared.ctx.classifier)(status_code);

        if breaker.state() == BreakerState::HalfOpen {
            let ramp = self.shared.ctx.breaker_settings.load().value.ramp();
            let weight = node.ramp().calculate_weight(node.orig_weight(), ramp);
            if weight != node.cur_weight() {
                table.apply_weight(&node, weight);
            }
        }
        breaker.record(!failure);
    }

    /// Push a discovery list through the degrade controller.
    pub fn reload(&self, nodes: Vec<Node<P>>) {
        let weak = Arc::downgrade(&self.shared);
        let on_apply: ApplyFn<P> = Arc::new(move |nodes: &[Node<P>], panic: bool| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(nodes, panic);
            }
        });
        self.shared
            .degrade
            .update_list(&self.shared.ctx.service, nodes, on_apply);
    }

    /// Look the service up and reload. On failure the applied list is kept.
    pub fn refresh(&self, discovery: &dyn Discovery<P>) -> GuardResult<()> {
        match discovery.lookup(&self.shared.ctx.service) {
            Ok(nodes) => {
                self.reload(nodes);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(service = %self.shared.ctx.service, error = %e, "Discovery failed, keeping current nodes");
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shared.table.load().nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the applied table is a panic snapshot.
    pub fn is_panic(&self) -> bool {
        self.shared.table.load().panic
    }

    pub fn snapshot(&self) -> Vec<NodeStatus> {
        self.shared.table.load().snapshot()
    }

    /// Current breaker state of `address`, with lazy transitions applied.
    pub fn breaker_state(&self, address: &str) -> Option<BreakerState> {
        let table = self.shared.table.load_full();
        let node = table.node(address)?;
        node.breaker().map(|b| b.state())
    }
}

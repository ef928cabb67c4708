//! Latest breaker state per `(service, node)`, read by the admin API.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::Serialize;

use crate::observability::metrics;
use crate::resilience::BreakerState;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BreakerEntry {
    pub service: String,
    pub node: String,
    pub state: &'static str,
}

#[derive(Debug, Default)]
pub struct BreakerStates {
    inner: DashMap<(String, String), BreakerState>,
}

impl BreakerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, service: &str, node: &str, state: BreakerState) {
        self.inner.insert((service.to_string(), node.to_string()), state);
        metrics::record_breaker_state(service, node, state);
    }

    pub fn get(&self, service: &str, node: &str) -> Option<BreakerState> {
        self.inner
            .get(&(service.to_string(), node.to_string()))
            .map(|r| *r.value())
    }

    /// Drop entries of `service` whose node is not in `keep`.
    pub fn retain_nodes(&self, service: &str, keep: &HashSet<String>) {
        self.inner
            .retain(|(svc, node), _| svc != service || keep.contains(node));
    }

    /// Drop every entry of `service`.
    pub fn clear_service(&self, service: &str) {
        self.inner.retain(|(svc, _), _| svc != service);
    }

    pub fn snapshot(&self) -> Vec<BreakerEntry> {
        let mut entries: Vec<BreakerEntry> = self
            .inner
            .iter()
            .map(|r| BreakerEntry {
                service: r.key().0.clone(),
                node: r.key().1.clone(),
                state: r.value().as_str(),
            })
            .collect();
        entries.sort_by(|a, b| (&a.service, &a.node).cmp(&(&b.service, &b.node)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_only_touches_one_service() {
        let states = BreakerStates::new();
        states.set("orders", "a:1", BreakerState::Open);
        states.set("orders", "b:1", BreakerState::Closed);
        states.set("billing", "a:1", BreakerState::HalfOpen);

        let keep: HashSet<String> = ["b:1".to_string()].into_iter().collect();
        states.retain_nodes("orders", &keep);

        assert_eq!(states.get("orders", "a:1"), None);
        assert_eq!(states.get("orders", "b:1"), Some(BreakerState::Closed));
        assert_eq!(states.get("billing", "a:1"), Some(BreakerState::HalfOpen));
        assert_eq!(states.snapshot().len(), 2);
        assert_eq!(states.snapshot()[0].service, "billing");
    }

    #[test]
    fn test_clear_service() {
        let states = BreakerStates::new();
        states.set("orders", "a:1", BreakerState::Open);
        states.set("billing", "a:1", BreakerState::Closed);

        states.clear_service("orders");
        assert_eq!(states.get("orders", "a:1"), None);
        assert_eq!(states.get("billing", "a:1"), Some(BreakerState::Closed));
    }
}

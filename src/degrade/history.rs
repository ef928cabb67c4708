//! Time-pruned log of accepted node-list snapshots.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::discovery::Node;

/// One snapshot.
#[derive(Debug, Clone)]
pub struct Elem<P> {
    pub at: Instant,
    pub nodes: Arc<Vec<Node<P>>>,
}

/// Snapshots in arrival order, oldest first.
#[derive(Debug)]
pub struct HistoryWindow<P> {
    elems: VecDeque<Elem<P>>,
}

impl<P> HistoryWindow<P> {
    pub fn new() -> Self {
        Self { elems: VecDeque::new() }
    }

    /// Append a snapshot. Within `save_interval` of the last entry the last
    /// entry's list is replaced instead, keeping its timestamp.
    pub fn append(&mut self, nodes: Arc<Vec<Node<P>>>, now: Instant, save_interval: Duration) {
        if let Some(last) = self.elems.back_mut() {
            if now.saturating_duration_since(last.at) < save_interval {
                last.nodes = nodes;
                return;
            }
        }
        self.elems.push_back(Elem { at: now, nodes });
    }

    /// Drop entries older than `retention`, except the youngest of them,
    /// which stays as the baseline until a younger entry ages out too.
    pub fn prune(&mut self, now: Instant, retention: Duration) {
        let expired = self
            .elems
            .iter()
            .take_while(|e| now.saturating_duration_since(e.at) > retention)
            .count();
        if expired > 1 {
            self.elems.drain(..expired - 1);
        }
    }

    /// Replace the whole window with one snapshot.
    pub fn reset(&mut self, nodes: Arc<Vec<Node<P>>>, now: Instant) {
        self.elems.clear();
        self.elems.push_back(Elem { at: now, nodes });
    }

    pub fn latest(&self) -> Option<&Arc<Vec<Node<P>>>> {
        self.elems.back().map(|e| &e.nodes)
    }

    pub fn oldest(&self) -> Option<&Arc<Vec<Node<P>>>> {
        self.elems.front().map(|e| &e.nodes)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }
}

impl<P> Default for HistoryWindow<P> {
    fn default() -> Self {
        Self::new()
    }
}

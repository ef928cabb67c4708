//! Weighted random selection.

use crate::load_balancer::picker::WeightedPicker;

/// Picks each node with probability proportional to its weight.
#[derive(Debug)]
pub struct WeightedRandom<P> {
    entries: Vec<(String, u32, P)>,
    total: u64,
}

impl<P> WeightedRandom<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
        }
    }

    fn recompute(&mut self) {
        self.total = self.entries.iter().map(|(_, w, _)| *w as u64).sum();
    }
}

impl<P> Default for WeightedRandom<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send> WeightedPicker<P> for WeightedRandom<P> {
    fn upsert(&mut self, id: &str, weight: u32, payload: P) {
        match self.entries.iter_mut().find(|(eid, _, _)| eid == id) {
            Some(entry) => {
                entry.1 = weight;
                entry.2 = payload;
            }
            None => self.entries.push((id.to_string(), weight, payload)),
        }
        self.recompute();
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(eid, _, _)| eid != id);
        self.recompute();
        self.entries.len() != before
    }

    fn next(&mut self) -> Option<P> {
        if self.entries.is_empty() {
            return None;
        }
        if self.total == 0 {
            let index = fastrand::usize(..self.entries.len());
            return Some(self.entries[index].2.clone());
        }

        let mut point = fastrand::u64(..self.total);
        for (_, weight, payload) in &self.entries {
            let weight = *weight as u64;
            if point < weight {
                return Some(payload.clone());
            }
            point -= weight;
        }
        None
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

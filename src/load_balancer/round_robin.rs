//! Smooth weighted round-robin.
//!
//! Each pick adds every node's weight to its running score, selects the
//! highest score and subtracts the total weight from it. When every weight is
//! zero the picker falls back to plain rotation so a non-empty table always
//! yields a node.

use crate::load_balancer::picker::WeightedPicker;

#[derive(Debug)]
struct Entry<P> {
    id: String,
    weight: i64,
    current: i64,
    payload: P,
}

/// Smooth weighted round-robin selector.
#[derive(Debug)]
pub struct SmoothRoundRobin<P> {
    entries: Vec<Entry<P>>,
    counter: usize,
}

impl<P> SmoothRoundRobin<P> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            counter: 0,
        }
    }
}

impl<P> Default for SmoothRoundRobin<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + Send> WeightedPicker<P> for SmoothRoundRobin<P> {
    fn upsert(&mut self, id: &str, weight: u32, payload: P) {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.weight = weight as i64;
                entry.payload = payload;
                if weight == 0 {
                    entry.current = 0;
                }
            }
            None => self.entries.push(Entry {
                id: id.to_string(),
                weight: weight as i64,
                current: 0,
                payload,
            }),
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    fn next(&mut self) -> Option<P> {
        if self.entries.is_empty() {
            return None;
        }

        let total: i64 = self.entries.iter().map(|e| e.weight).sum();
        if total == 0 {
            let index = self.counter % self.entries.len();
            self.counter = self.counter.wrapping_add(1);
            return Some(self.entries[index].payload.clone());
        }

        for entry in self.entries.iter_mut() {
            entry.current += entry.weight;
        }
        // Ties keep the earlier entry; zero weights never win.
        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.weight == 0 {
                continue;
            }
            if best.map_or(true, |b| entry.current > self.entries[b].current) {
                best = Some(i);
            }
        }
        let best = best?;
        self.entries[best].current -= total;
        Some(self.entries[best].payload.clone())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_interleaving() {
        let mut rr = SmoothRoundRobin::new();
        rr.upsert("a", 5, "a");
        rr.upsert("b", 1, "b");
        rr.upsert("c", 1, "c");

        let picks: Vec<&str> = (0..7).filter_map(|_| rr.next()).collect();
        assert_eq!(picks, vec!["a", "a", "b", "a", "c", "a", "a"]);
    }

    #[test]
    fn test_zero_weight_is_skipped() {
        let mut rr = SmoothRoundRobin::new();
        rr.upsert("a", 1, "a");
        rr.upsert("b", 0, "b");
        for _ in 0..5 {
            assert_eq!(rr.next(), Some("a"));
        }

        rr.upsert("b", 1, "b");
        let picks: Vec<&str> = (0..4).filter_map(|_| rr.next()).collect();
        assert_eq!(picks.iter().filter(|p| **p == "b").count(), 2);
    }

    #[test]
    fn test_all_zero_falls_back_to_rotation() {
        let mut rr = SmoothRoundRobin::new();
        rr.upsert("a", 0, "a");
        rr.upsert("b", 0, "b");
        assert_eq!(rr.next(), Some("a"));
        assert_eq!(rr.next(), Some("b"));
        assert_eq!(rr.next(), Some("a"));
    }

    #[test]
    fn test_remove() {
        let mut rr = SmoothRoundRobin::new();
        rr.upsert("a", 1, 1u8);
        assert!(rr.remove("a"));
        assert!(!rr.remove("a"));
        assert_eq!(rr.next(), None);
    }
}

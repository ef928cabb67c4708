//! Weighted picker capability.
//!
//! A picker is handed `(id, weight, payload)` tuples and returns one payload
//! per `next()` call. Weight 0 removes a node from rotation without removing
//! it from the table.

use std::str::FromStr;
use std::sync::Arc;

use crate::error::GuardError;
use crate::load_balancer::random::WeightedRandom;
use crate::load_balancer::round_robin::SmoothRoundRobin;

pub trait WeightedPicker<P>: Send {
    /// Insert `id`, or replace its weight and payload.
    fn upsert(&mut self, id: &str, weight: u32, payload: P);

    /// Remove `id`. Returns true if it was present.
    fn remove(&mut self, id: &str) -> bool;

    /// Select the next payload, or `None` if the picker is empty.
    fn next(&mut self) -> Option<P>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates an empty picker for each new node table.
pub type PickerFactory<P> = Arc<dyn Fn() -> Box<dyn WeightedPicker<P>> + Send + Sync>;

/// Stock picker algorithms, selectable by name in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    RoundRobin,
    Random,
}

impl FromStr for PickerKind {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" | "smooth_round_robin" => Ok(PickerKind::RoundRobin),
            "random" | "weighted_random" => Ok(PickerKind::Random),
            other => Err(GuardError::Build(format!("unknown picker '{}'", other))),
        }
    }
}

impl PickerKind {
    pub fn factory<P: Clone + Send + 'static>(self) -> PickerFactory<P> {
        match self {
            PickerKind::RoundRobin => Arc::new(|| Box::new(SmoothRoundRobin::new()) as Box<dyn WeightedPicker<P>>),
            PickerKind::Random => Arc::new(|| Box::new(WeightedRandom::new()) as Box<dyn WeightedPicker<P>>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picker_kind_from_name() {
        assert_eq!("round_robin".parse::<PickerKind>().unwrap(), PickerKind::RoundRobin);
        assert_eq!("random".parse::<PickerKind>().unwrap(), PickerKind::Random);
        assert!(matches!("p2c".parse::<PickerKind>(), Err(GuardError::Build(_))));
    }

    #[test]
    fn test_factory_builds_empty_pickers() {
        let factory = PickerKind::Random.factory::<u8>();
        let mut picker = factory();
        assert!(picker.is_empty());
        assert_eq!(picker.next(), None);
    }
}

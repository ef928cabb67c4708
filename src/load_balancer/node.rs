//! A node inside a rebalancer table.
//!
//! # Responsibilities
//! - Hold the authoritative weight from discovery and the advertised weight
//! - Own the node's circuit breaker and weight ramp
//! - Cancel its delayed re-arm when the table generation is dropped

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::resilience::{BreakerState, CircuitBreaker, RatioRamp};

/// One entry of a node table. Never carried across table rebuilds.
#[derive(Debug)]
pub struct RbNode<P> {
    id: String,
    orig_weight: u32,
    cur_weight: AtomicU32,
    payload: P,
    /// `None` while the service is in panic.
    breaker: Option<CircuitBreaker>,
    ramp: RatioRamp,
    open_epoch: AtomicU64,
    rearm: CancellationToken,
}

impl<P> RbNode<P> {
    pub fn new(id: String, weight: u32, payload: P, breaker: Option<CircuitBreaker>) -> Self {
        Self {
            id,
            orig_weight: weight,
            cur_weight: AtomicU32::new(weight),
            payload,
            breaker,
            ramp: RatioRamp::new(),
            open_epoch: AtomicU64::new(0),
            rearm: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn orig_weight(&self) -> u32 {
        self.orig_weight
    }

    pub fn cur_weight(&self) -> u32 {
        self.cur_weight.load(Ordering::Acquire)
    }

    /// Store `weight` capped at the original weight; returns the stored value.
    pub fn set_cur_weight(&self, weight: u32) -> u32 {
        let weight = weight.min(self.orig_weight);
        self.cur_weight.store(weight, Ordering::Release);
        weight
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.breaker.as_ref().map(|b| b.current_state())
    }

    pub fn ramp(&self) -> &RatioRamp {
        &self.ramp
    }

    /// Start a new Open episode and return its number.
    pub(crate) fn begin_open_episode(&self) -> u64 {
        self.open_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn open_episode(&self) -> u64 {
        self.open_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn rearm_token(&self) -> CancellationToken {
        self.rearm.clone()
    }
}

impl<P> Drop for RbNode<P> {
    fn drop(&mut self) {
        self.rearm.cancel();
    }
}

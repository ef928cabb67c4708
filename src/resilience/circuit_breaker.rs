//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, outcomes are counted
//! - Open: node assumed down, failures are only reported to metrics
//! - Half-Open: node is re-tested with ramped traffic
//!
//! # State Transitions
//! ```text
//! Closed → Open: requests > 0 and failure ratio > 90% at a check boundary
//! Open → Half-Open: fallback duration elapsed (checked lazily)
//! Half-Open → Closed: recovery duration elapsed without tripping again
//! Half-Open → Open: trip condition at a check boundary
//! ```
//!
//! # Design Decisions
//! - Per-node breaker, transitions serialized by one mutex
//! - Outcomes are sampled by a token bucket to cap overhead under high QPS
//! - Every move into Open is offered to an interceptor that may veto it
//! - The state is mirrored in an atomic so other nodes' interceptors can read
//!   it without taking this breaker's lock

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{BreakerSettings, HotSwap};
use crate::error::{GuardError, GuardResult};
use crate::observability::metrics;
use crate::resilience::sampler::TokenBucket;
use crate::resilience::window::{Counts, SlidingWindow};

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(val: u8) -> Self {
        match val {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(id, from, to) -> veto`. Only consulted for transitions into Open.
pub type Interceptor = Arc<dyn Fn(&str, BreakerState, BreakerState) -> bool + Send + Sync>;

/// `(id, from, to)`, invoked synchronously for every accepted transition.
pub type StateListener = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

/// Trip predicate evaluated at each check boundary.
pub type ReadyToTrip = Arc<dyn Fn(&Counts, &BreakerSettings) -> bool + Send + Sync>;

/// Default trip policy: at least one request and failure ratio above the
/// configured threshold.
pub fn default_ready_to_trip(counts: &Counts, settings: &BreakerSettings) -> bool {
    counts.requests > 0 && counts.failure_ratio() > settings.failure_ratio
}

struct Inner {
    since: Instant,
    last_check: Instant,
    window: SlidingWindow,
    sampler: TokenBucket,
}

/// Per-node circuit breaker.
pub struct CircuitBreaker {
    id: String,
    service: String,
    settings: Arc<HotSwap<BreakerSettings>>,
    state: AtomicU8,
    inner: Mutex<Inner>,
    ready_to_trip: ReadyToTrip,
    interceptor: Option<Interceptor>,
    on_state_change: Option<StateListener>,
}

/// Builder for [`CircuitBreaker`].
pub struct BreakerBuilder {
    id: String,
    service: String,
    settings: Arc<HotSwap<BreakerSettings>>,
    ready_to_trip: Option<ReadyToTrip>,
    interceptor: Option<Interceptor>,
    on_state_change: Option<StateListener>,
}

impl BreakerBuilder {
    /// Service the node belongs to; used as a metrics label.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn ready_to_trip(mut self, f: ReadyToTrip) -> Self {
        self.ready_to_trip = Some(f);
        self
    }

    pub fn interceptor(mut self, f: Interceptor) -> Self {
        self.interceptor = Some(f);
        self
    }

    pub fn on_state_change(mut self, f: StateListener) -> Self {
        self.on_state_change = Some(f);
        self
    }

    pub fn build(self) -> GuardResult<CircuitBreaker> {
        if self.id.is_empty() {
            return Err(GuardError::Build("breaker id must not be empty".into()));
        }
        let snapshot = self.settings.load();
        let s = &snapshot.value;
        if s.sample_rate == 0 || s.window_buckets == 0 {
            return Err(GuardError::Build(format!(
                "breaker {}: sample_rate and window_buckets must be positive",
                self.id
            )));
        }
        let now = Instant::now();
        let inner = Inner {
            since: now,
            last_check: now,
            window: SlidingWindow::new(s.window(), s.window_buckets, now),
            sampler: TokenBucket::new(s.sample_rate as f64, now),
        };
        Ok(CircuitBreaker {
            id: self.id,
            service: self.service,
            settings: self.settings,
            state: AtomicU8::new(BreakerState::Closed as u8),
            inner: Mutex::new(inner),
            ready_to_trip: self
                .ready_to_trip
                .unwrap_or_else(|| Arc::new(default_ready_to_trip)),
            interceptor: self.interceptor,
            on_state_change: self.on_state_change,
        })
    }
}

impl CircuitBreaker {
    pub fn builder(id: impl Into<String>, settings: Arc<HotSwap<BreakerSettings>>) -> BreakerBuilder {
        BreakerBuilder {
            id: id.into(),
            service: String::new(),
            settings,
            ready_to_trip: None,
            interceptor: None,
            on_state_change: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state after applying any time-based transition that is due.
    pub fn state(&self) -> BreakerState {
        let snapshot = self.settings.load();
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, &snapshot.value, now)
    }

    /// Last published state, without lazy transitions or locking.
    pub fn current_state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Rolling counts inside the current window.
    pub fn counts(&self) -> Counts {
        self.inner.lock().window.totals(Instant::now())
    }

    /// Record the outcome of one call.
    pub fn record(&self, success: bool) {
        let snapshot = self.settings.load();
        let settings = &snapshot.value;
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let state = self.advance(&mut inner, settings, now);

        let rate = settings.sample_rate as f64;
        if !inner.sampler.try_acquire(rate, rate, now) {
            return;
        }

        if state == BreakerState::Open {
            if !success {
                metrics::record_open_failure(&self.service, &self.id);
            }
            return;
        }

        if !inner.window.has_shape(settings.window(), settings.window_buckets) {
            inner.window = SlidingWindow::new(settings.window(), settings.window_buckets, now);
        }
        inner.window.record(success, now);

        if now.saturating_duration_since(inner.last_check) < settings.check_period() {
            return;
        }
        inner.last_check = now;
        inner.window.expire(now);
        let counts = inner.window.totals(now);
        if (self.ready_to_trip)(&counts, settings) {
            tracing::debug!(
                node = %self.id,
                requests = counts.requests,
                failures = counts.failures,
                "Trip condition met"
            );
            self.transition(&mut inner, BreakerState::Open, now);
        }
    }

    fn advance(&self, inner: &mut Inner, settings: &BreakerSettings, now: Instant) -> BreakerState {
        let elapsed = now.saturating_duration_since(inner.since);
        match self.current_state() {
            BreakerState::Open if elapsed >= settings.fallback() => {
                self.transition(inner, BreakerState::HalfOpen, now);
            }
            BreakerState::HalfOpen if elapsed >= settings.recovery() => {
                self.transition(inner, BreakerState::Closed, now);
            }
            _ => {}
        }
        self.current_state()
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) -> bool {
        let from = self.current_state();
        if from == to {
            return false;
        }

        if to == BreakerState::Open {
            if let Some(intercept) = &self.interceptor {
                if intercept(&self.id, from, to) {
                    tracing::info!(node = %self.id, from = %from, "Breaker trip vetoed");
                    inner.window.clear();
                    return false;
                }
            }
        }

        let time_in_state = now.saturating_duration_since(inner.since);
        self.state.store(to as u8, Ordering::Release);
        inner.since = now;
        inner.last_check = now;
        inner.window.clear();

        metrics::record_breaker_transition(&self.service, &self.id, from, to, time_in_state);
        match to {
            BreakerState::Open => tracing::warn!(service = %self.service, node = %self.id, from = %from, "Breaker opened"),
            _ => tracing::info!(
                service = %self.service,
                node = %self.id,
                from = %from,
                to = %to,
                "Breaker state changed"
            ),
        }

        if let Some(listener) = &self.on_state_change {
            listener(&self.id, from, to);
        }
        true
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("id", &self.id)
            .field("state", &self.current_state())
            .finish()
    }
}

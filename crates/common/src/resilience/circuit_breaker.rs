//! Circuit breaker for gating calls to a single backend
//!
//! The breaker is pure bookkeeping: it does not know what operation ran, only
//! whether the caller reported a success or a failure. All state lives behind
//! one mutex per breaker instance, so no two transitions are ever evaluated
//! concurrently for the same backend.
//!
//! ```text
//!            failures >= threshold                cooldown elapsed
//!   CLOSED ------------------------> OPEN ------------------------> HALF_OPEN
//!     ^                                ^                                |
//!     |          trial failed          |                                |
//!     |        <-----------------------+--------------------------------+
//!     |                   trial succeeded                               |
//!     +-----------------------------------------------------------------+
//! ```
//!
//! Callers either use the bare contract ([`CircuitBreaker::allow`],
//! [`CircuitBreaker::record_success`], [`CircuitBreaker::record_failure`]) or
//! take a [`CallPermit`] via [`CircuitBreaker::try_acquire`]. A permit that is
//! dropped without an outcome (the caller's future was cancelled) hands its
//! half-open trial slot back instead of counting as either outcome.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{CommonError, CommonResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing a trial request to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait before an open circuit admits a trial call
    pub cooldown: Duration,
    /// Trial calls admitted while half-open
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, cooldown: Duration::from_secs(30), half_open_trial_count: 1 }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::config_field(
                "failure_threshold",
                "must be greater than 0",
            ));
        }

        if self.half_open_trial_count == 0 {
            return Err(CommonError::config_field(
                "half_open_trial_count",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn half_open_trial_count(mut self, count: u32) -> Self {
        self.config.half_open_trial_count = count;
        self
    }

    pub fn build(self) -> CommonResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker, for logs and health reporting
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    // Bumped on every transition so stale permits cannot decide a newer state.
    generation: u64,
}

#[derive(Debug, Default)]
struct BreakerCounters {
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

/// Circuit breaker guarding one backend
///
/// Clones share state; hand a clone to every component that reports outcomes
/// for the same backend.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    counters: Arc<BreakerCounters>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: &str, config: CircuitBreakerConfig) -> CommonResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(name: &str, config: CircuitBreakerConfig, clock: C) -> CommonResult<Self> {
        config.validate()?;

        Ok(Self {
            name: Arc::from(name),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trials_in_flight: 0,
                generation: 0,
            })),
            counters: Arc::new(BreakerCounters::default()),
            clock: Arc::new(clock),
        })
    }

    /// Backend name this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(breaker = %self.name, "Circuit breaker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Decide whether a call may be attempted right now
    ///
    /// An open breaker whose cooldown has elapsed transitions to half-open and
    /// admits the trial call; this method consumes that trial slot.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        let admitted = self.admit(&mut inner);
        drop(inner);

        if admitted {
            self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Take a permit for one call, or `None` if the breaker refuses it
    pub fn try_acquire(&self) -> Option<CallPermit<C>> {
        let mut inner = self.lock();
        if !self.admit(&mut inner) {
            drop(inner);
            self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(breaker = %self.name, "Circuit breaker rejecting call");
            return None;
        }
        let admitted_in = inner.state;
        let generation = inner.generation;
        drop(inner);

        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        Some(CallPermit { breaker: self.clone(), admitted_in, generation, settled: false })
    }

    fn admit(&self, inner: &mut BreakerInner) -> bool {
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |opened| {
                        self.clock.now().duration_since(opened) >= self.config.cooldown
                    });
                if cooled_down {
                    self.transition(inner, CircuitState::HalfOpen);
                    inner.trials_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_trial_count {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.apply_success(&mut inner);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.apply_failure(&mut inner);
    }

    fn apply_success(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                self.transition(inner, CircuitState::Closed);
                inner.consecutive_failures = 0;
                inner.trials_in_flight = 0;
                info!(breaker = %self.name, "Circuit breaker closed after successful trial call");
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Ignoring late success while circuit is open");
            }
        }
    }

    fn apply_failure(&self, inner: &mut BreakerInner) {
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(inner);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(inner);
                inner.trials_in_flight = 0;
                warn!(breaker = %self.name, "Circuit breaker re-opened after failed trial call");
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        self.transition(inner, CircuitState::Open);
        inner.opened_at = Some(self.clock.now());
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state != to {
            debug!(breaker = %self.name, from = %inner.state, to = %to, "Circuit breaker transition");
            inner.state = to;
            inner.generation = inner.generation.wrapping_add(1);
            if to == CircuitState::HalfOpen {
                info!(breaker = %self.name, "Circuit breaker half-open, admitting trial call");
            }
        }
    }

    /// Get the current state of the circuit breaker
    ///
    /// Reading the state never transitions it; only [`Self::allow`] and
    /// [`Self::try_acquire`] move an open breaker to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Remaining cooldown while open, `None` otherwise
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                let waited = self.clock.now().duration_since(opened);
                Some(self.config.cooldown.saturating_sub(waited))
            }
            _ => None,
        }
    }

    /// Snapshot of state and counters
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            total_calls: self.counters.total_calls.load(Ordering::Acquire),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Acquire),
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trials_in_flight = 0;
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }

    fn settle(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(breaker = %self.name, success, "Discarding outcome admitted under an earlier state");
            return;
        }
        if success {
            self.apply_success(&mut inner);
        } else {
            self.apply_failure(&mut inner);
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            debug!(breaker = %self.name, "Trial call abandoned, releasing half-open slot");
        }
    }
}

/// Admission ticket for a single call through a [`CircuitBreaker`]
///
/// Settle it with [`CallPermit::succeeded`] or [`CallPermit::failed`]. Dropping
/// an unsettled permit records nothing and frees its half-open trial slot.
#[must_use = "a permit must be settled with succeeded() or failed()"]
pub struct CallPermit<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    admitted_in: CircuitState,
    generation: u64,
    settled: bool,
}

impl<C: Clock> CallPermit<C> {
    /// State the breaker was in when this call was admitted
    pub fn admitted_in(&self) -> CircuitState {
        self.admitted_in
    }

    /// Report that the guarded call succeeded
    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, true);
    }

    /// Report that the guarded call failed
    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, false);
    }
}

impl<C: Clock> Drop for CallPermit<C> {
    fn drop(&mut self) {
        if !self.settled && self.admitted_in == CircuitState::HalfOpen {
            self.breaker.release_trial(self.generation);
        }
    }
}

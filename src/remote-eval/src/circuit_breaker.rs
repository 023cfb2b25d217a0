//! Closed / Open / HalfOpen circuit breaker with rolling failure-rate accounting
//!
//! One breaker guards one downstream dependency and is shared by every
//! concurrent caller. State mutation is serialized through a single mutex
//! that is never held across an await point; the current state is mirrored
//! into an atomic so routing checks stay lock-free.

use parking_lot::Mutex;
use prometheus::Registry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::info;

use crate::config::CircuitConfig;
use crate::error::{RemoteEvalError, Result};
use crate::observability::{CircuitEvent, CircuitMetrics, EventHooks};
use crate::rolling::{RollingCounts, RollingWindow};
use crate::types::CircuitState;

/// A call turned away without contacting the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub state: CircuitState,
    pub failure_count: u64,
}

/// Failure of a guarded call
#[derive(Debug, Clone)]
pub enum BreakerError {
    /// The circuit refused the call
    Rejected(Rejection),
    /// The call ran and failed; `state` is the circuit state after accounting for it
    Failed {
        error: RemoteEvalError,
        state: CircuitState,
        failure_count: u64,
    },
}

/// Internal state tracking
#[derive(Debug)]
struct StateData {
    state: CircuitState,
    window: RollingWindow,
    consecutive_failures: u64,
    probe_in_flight: bool,
    opened_at: Option<Instant>,
    last_state_change: Instant,
    /// Bumped on every transition so late results from an earlier period are ignored
    generation: u64,
}

impl StateData {
    fn new(config: &CircuitConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            window: RollingWindow::new(config.rolling_window(), config.rolling_buckets),
            consecutive_failures: 0,
            probe_in_flight: false,
            opened_at: None,
            last_state_change: Instant::now(),
            generation: 0,
        }
    }
}

/// Admission ticket for one call through the breaker
///
/// Dropping an unfinished probe permit releases the probe slot so the
/// circuit cannot wedge in HalfOpen when a caller abandons its request.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    finished: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.finished {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Circuit breaker guarding a single downstream dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: AtomicU8,
    /// Milliseconds since `epoch` at which the circuit last opened
    opened_at_ms: AtomicU64,
    epoch: Instant,
    state_data: Mutex<StateData>,
    hooks: EventHooks,
}

impl CircuitBreaker {
    /// Create a circuit breaker whose metrics are not exported
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Result<Self> {
        let name = name.into();
        let metrics = CircuitMetrics::unregistered(&name)?;
        Ok(Self::with_metrics(name, config, metrics))
    }

    /// Create with custom metrics registry
    pub fn new_with_registry(
        name: impl Into<String>,
        config: CircuitConfig,
        registry: &Registry,
    ) -> Result<Self> {
        let name = name.into();
        let metrics = CircuitMetrics::new(&name, registry)?;
        Ok(Self::with_metrics(name, config, metrics))
    }

    fn with_metrics(name: String, config: CircuitConfig, metrics: CircuitMetrics) -> Self {
        let hooks = EventHooks::new(name.clone(), metrics, config.reset_timeout());

        Self {
            state_data: Mutex::new(StateData::new(&config)),
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            name,
            config,
            hooks,
        }
    }

    /// Execute `f` under circuit breaker protection
    ///
    /// Every invocation that reaches `f` is counted individually, so retries
    /// of one logical request each contribute to the failure statistics.
    pub async fn call<F, Fut, T>(&self, f: F) -> std::result::Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut permit = self.try_acquire().map_err(BreakerError::Rejected)?;

        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();

        permit.finished = true;
        match result {
            Ok(value) => {
                self.on_success(&permit, elapsed);
                Ok(value)
            }
            Err(error) => {
                let (state, failure_count) = self.on_failure(&permit, &error, elapsed);
                Err(BreakerError::Failed {
                    error,
                    state,
                    failure_count,
                })
            }
        }
    }

    fn try_acquire(&self) -> std::result::Result<Permit<'_>, Rejection> {
        let mut data = self.state_data.lock();

        let current = data.state;
        let probe = match current {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.reset_elapsed(&data) {
                    return Err(self.reject(&mut data));
                }
                self.transition_to_half_open(&mut data);
                data.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if data.probe_in_flight {
                    return Err(self.reject(&mut data));
                }
                data.probe_in_flight = true;
                true
            }
        };

        data.window.record_fire();
        Ok(Permit {
            breaker: self,
            probe,
            generation: data.generation,
            finished: false,
        })
    }

    /// Reject without running anything if the circuit is Open and the reset
    /// timeout has not elapsed. Checked and counted under the state lock.
    pub fn reject_if_open(&self) -> Option<Rejection> {
        let mut data = self.state_data.lock();
        if data.state != CircuitState::Open || self.reset_elapsed(&data) {
            return None;
        }
        Some(self.reject(&mut data))
    }

    fn reset_elapsed(&self, data: &StateData) -> bool {
        data.opened_at
            .map(|at| at.elapsed() >= self.config.reset_timeout())
            .unwrap_or(true)
    }

    /// Rejections always report Open, including siblings of a half-open probe
    fn reject(&self, data: &mut StateData) -> Rejection {
        data.window.record_reject();
        self.hooks.on_reject(
            CircuitState::Open,
            data.consecutive_failures,
            self.config.reset_timeout_ms,
        );

        Rejection {
            state: CircuitState::Open,
            failure_count: data.consecutive_failures,
        }
    }

    fn on_success(&self, permit: &Permit<'_>, latency: Duration) {
        let mut data = self.state_data.lock();
        data.window.record_success();
        self.hooks.on_success(latency);

        // A straggler admitted before the trip does not clear the count while Open
        if data.state != CircuitState::Open {
            data.consecutive_failures = 0;
        }

        let current_probe = permit.probe && permit.generation == data.generation;
        if current_probe && data.state == CircuitState::HalfOpen {
            self.transition_to_closed(&mut data);
        }
    }

    fn on_failure(
        &self,
        permit: &Permit<'_>,
        error: &RemoteEvalError,
        latency: Duration,
    ) -> (CircuitState, u64) {
        let timed_out = matches!(error, RemoteEvalError::Timeout(_));

        let mut data = self.state_data.lock();
        data.window.record_failure(timed_out);
        data.consecutive_failures += 1;

        if timed_out {
            self.hooks.on_timeout(self.config.timeout_ms, latency);
        }
        self.hooks
            .on_failure(data.consecutive_failures, &error.to_string(), latency);

        let current = data.state;
        match current {
            CircuitState::HalfOpen if permit.probe && permit.generation == data.generation => {
                // Probe failed: back to Open with a fresh reset timer
                data.probe_in_flight = false;
                self.transition_to_open(&mut data);
            }
            CircuitState::Closed => {
                let totals = data.window.totals();
                if self.should_trip(&totals) {
                    self.transition_to_open(&mut data);
                }
            }
            _ => {}
        }

        (data.state, data.consecutive_failures)
    }

    fn should_trip(&self, totals: &RollingCounts) -> bool {
        totals.fires >= self.config.failure_threshold
            && totals.failure_percent() >= self.config.error_threshold_percent
    }

    fn release_probe(&self, generation: u64) {
        let mut data = self.state_data.lock();
        if data.generation == generation && data.state == CircuitState::HalfOpen {
            data.probe_in_flight = false;
        }
    }

    /// Current state as last recorded. Lock-free.
    pub fn get_state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while calls would be rejected outright: Open and the reset timeout
    /// has not yet elapsed. Lock-free.
    pub fn is_open(&self) -> bool {
        if self.get_state() != CircuitState::Open {
            return false;
        }
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(opened_at) < self.config.reset_timeout_ms
    }

    /// Consecutive failures since the last success
    pub fn failure_count(&self) -> u64 {
        self.state_data.lock().consecutive_failures
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CircuitMetrics {
        self.hooks.metrics()
    }

    /// Subscribe to state transitions, failures and rejections
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.hooks.subscribe()
    }

    /// Force circuit to open state (for manual control)
    pub fn force_open(&self) {
        let mut data = self.state_data.lock();
        if data.state != CircuitState::Open {
            self.transition_to_open(&mut data);
            info!(breaker = %self.name, "Circuit breaker manually opened");
        }
    }

    /// Force circuit to closed state (for manual control)
    pub fn force_close(&self) {
        let mut data = self.state_data.lock();
        if data.state != CircuitState::Closed {
            self.transition_to_closed(&mut data);
            info!(breaker = %self.name, "Circuit breaker manually closed");
        }
    }

    /// Reset circuit breaker to initial state
    pub fn reset(&self) {
        let mut data = self.state_data.lock();
        let generation = data.generation + 1;
        *data = StateData::new(&self.config);
        data.generation = generation;
        self.state.store(CircuitState::Closed.as_u8(), Ordering::Release);
        info!(breaker = %self.name, "Circuit breaker reset");
        self.hooks.on_close();
    }

    /// Get statistics about the circuit breaker
    pub fn get_stats(&self) -> CircuitStats {
        let mut data = self.state_data.lock();
        let metrics = self.hooks.metrics();
        CircuitStats {
            state: data.state,
            window: data.window.totals(),
            consecutive_failures: data.consecutive_failures,
            time_in_current_state: data.last_state_change.elapsed(),
            total_successes: metrics.success_counter.get() as u64,
            total_failures: metrics.failure_counter.get() as u64,
            total_timeouts: metrics.timeout_counter.get() as u64,
            total_trips: metrics.trip_counter.get() as u64,
            total_rejected: metrics.rejected_counter.get() as u64,
        }
    }

    // State transition helpers
    fn set_state(&self, data: &mut StateData, state: CircuitState) {
        data.state = state;
        data.generation += 1;
        data.last_state_change = Instant::now();
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition_to_open(&self, data: &mut StateData) {
        let now = Instant::now();
        data.opened_at = Some(now);
        data.probe_in_flight = false;
        self.opened_at_ms.store(
            now.duration_since(self.epoch).as_millis() as u64,
            Ordering::Release,
        );
        self.set_state(data, CircuitState::Open);

        let stats = data.window.totals();
        self.hooks
            .on_open(self.config.reset_timeout_ms, data.consecutive_failures, stats);
    }

    fn transition_to_half_open(&self, data: &mut StateData) {
        data.probe_in_flight = false;
        self.set_state(data, CircuitState::HalfOpen);
        self.hooks.on_half_open();
    }

    fn transition_to_closed(&self, data: &mut StateData) {
        data.window.reset();
        data.consecutive_failures = 0;
        data.probe_in_flight = false;
        data.opened_at = None;
        self.set_state(data, CircuitState::Closed);
        self.hooks.on_close();
    }
}

/// Statistics snapshot for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub state: CircuitState,
    /// Counts inside the rolling window
    pub window: RollingCounts,
    pub consecutive_failures: u64,
    pub time_in_current_state: Duration,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_trips: u64,
    pub total_rejected: u64,
}

impl CircuitStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }
}

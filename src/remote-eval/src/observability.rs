//! Metrics, structured logging and event notification for circuit transitions

use parking_lot::Mutex;
use prometheus::{Counter, Gauge, HistogramOpts, HistogramVec, Registry};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rolling::RollingCounts;
use crate::types::CircuitState;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observable circuit breaker event
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitEvent {
    /// A call reached the transport and failed
    Failure {
        consecutive_failures: u64,
        error: String,
    },
    /// A call was cut off by the transport timeout
    Timeout { timeout_ms: u64 },
    Opened {
        reset_timeout_ms: u64,
        stats: RollingCounts,
    },
    HalfOpened,
    Closed,
    /// A call was turned away without contacting the transport
    Rejected { state: CircuitState },
}

/// Prometheus metrics for one circuit breaker
#[derive(Debug)]
pub struct CircuitMetrics {
    pub state_gauge: Gauge,
    pub trip_counter: Counter,
    pub success_counter: Counter,
    pub failure_counter: Counter,
    pub rejected_counter: Counter,
    pub timeout_counter: Counter,
    pub latency_histogram: HistogramVec,
}

impl CircuitMetrics {
    /// Create metrics and register them with `registry`
    pub fn new(name: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered(name)?;

        registry.register(Box::new(metrics.state_gauge.clone()))?;
        registry.register(Box::new(metrics.trip_counter.clone()))?;
        registry.register(Box::new(metrics.success_counter.clone()))?;
        registry.register(Box::new(metrics.failure_counter.clone()))?;
        registry.register(Box::new(metrics.rejected_counter.clone()))?;
        registry.register(Box::new(metrics.timeout_counter.clone()))?;
        registry.register(Box::new(metrics.latency_histogram.clone()))?;

        Ok(metrics)
    }

    /// Create metrics that are tracked but not exported
    pub fn unregistered(name: &str) -> Result<Self, prometheus::Error> {
        // Prometheus metric names only allow [a-zA-Z0-9_:]
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        Ok(Self {
            state_gauge: Gauge::new(
                format!("remote_eval_circuit_state_{}", sanitized),
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            )?,
            trip_counter: Counter::new(
                format!("remote_eval_circuit_trips_total_{}", sanitized),
                "Total number of circuit breaker trips",
            )?,
            success_counter: Counter::new(
                format!("remote_eval_circuit_success_total_{}", sanitized),
                "Total successful calls",
            )?,
            failure_counter: Counter::new(
                format!("remote_eval_circuit_failure_total_{}", sanitized),
                "Total failed calls",
            )?,
            rejected_counter: Counter::new(
                format!("remote_eval_circuit_rejected_total_{}", sanitized),
                "Total calls rejected without contacting the transport",
            )?,
            timeout_counter: Counter::new(
                format!("remote_eval_circuit_timeout_total_{}", sanitized),
                "Total calls cut off by the transport timeout",
            )?,
            latency_histogram: HistogramVec::new(
                HistogramOpts::new(
                    format!("remote_eval_circuit_latency_seconds_{}", sanitized),
                    "Transport round-trip latency distribution",
                ),
                &["status"],
            )?,
        })
    }
}

/// Hooks invoked by the breaker on every counted outcome and transition
pub struct EventHooks {
    name: String,
    metrics: CircuitMetrics,
    events: broadcast::Sender<CircuitEvent>,
    reject_log_interval: Duration,
    last_reject_log: Mutex<Option<Instant>>,
}

impl EventHooks {
    /// `reject_log_interval` bounds how often rejections are logged
    pub fn new(
        name: impl Into<String>,
        metrics: CircuitMetrics,
        reject_log_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        metrics.state_gauge.set(CircuitState::Closed.as_metric_value());

        Self {
            name: name.into(),
            metrics,
            events,
            reject_log_interval,
            last_reject_log: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &CircuitMetrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CircuitEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn on_success(&self, latency: Duration) {
        self.metrics.success_counter.inc();
        self.metrics
            .latency_histogram
            .with_label_values(&["success"])
            .observe(latency.as_secs_f64());
    }

    pub fn on_failure(&self, consecutive_failures: u64, error: &str, latency: Duration) {
        self.metrics.failure_counter.inc();
        self.metrics
            .latency_histogram
            .with_label_values(&["failure"])
            .observe(latency.as_secs_f64());

        debug!(
            breaker = %self.name,
            consecutive_failures,
            error,
            "Remote evaluation call failed"
        );
        self.emit(CircuitEvent::Failure {
            consecutive_failures,
            error: error.to_string(),
        });
    }

    pub fn on_timeout(&self, timeout_ms: u64, latency: Duration) {
        self.metrics.timeout_counter.inc();
        self.metrics
            .latency_histogram
            .with_label_values(&["timeout"])
            .observe(latency.as_secs_f64());

        debug!(breaker = %self.name, timeout_ms, "Request timed out");
        self.emit(CircuitEvent::Timeout { timeout_ms });
    }

    pub fn on_open(&self, reset_timeout_ms: u64, consecutive_failures: u64, stats: RollingCounts) {
        self.metrics.trip_counter.inc();
        self.metrics.state_gauge.set(CircuitState::Open.as_metric_value());

        warn!(
            breaker = %self.name,
            failure_count = consecutive_failures,
            reset_timeout_ms,
            window_fires = stats.fires,
            window_failures = stats.failures,
            window_failure_percent = stats.failure_percent(),
            "Circuit breaker opened"
        );
        self.emit(CircuitEvent::Opened {
            reset_timeout_ms,
            stats,
        });
    }

    pub fn on_half_open(&self) {
        self.metrics.state_gauge.set(CircuitState::HalfOpen.as_metric_value());

        debug!(
            breaker = %self.name,
            "Circuit breaker entering half-open state - probing for recovery"
        );
        self.emit(CircuitEvent::HalfOpened);
    }

    pub fn on_close(&self) {
        self.metrics.state_gauge.set(CircuitState::Closed.as_metric_value());

        info!(breaker = %self.name, "Circuit breaker closed - service recovered");
        self.emit(CircuitEvent::Closed);
    }

    /// Record a rejection. Returns true if this rejection was logged.
    pub fn on_reject(
        &self,
        state: CircuitState,
        consecutive_failures: u64,
        retry_after_ms: u64,
    ) -> bool {
        self.metrics.rejected_counter.inc();
        self.emit(CircuitEvent::Rejected { state });

        let now = Instant::now();
        let mut last = self.last_reject_log.lock();
        let due = match *last {
            Some(at) => now.duration_since(at) > self.reject_log_interval,
            None => true,
        };

        if due {
            warn!(
                breaker = %self.name,
                state = %state,
                failure_count = consecutive_failures,
                retry_after_ms,
                "Circuit breaker rejecting requests"
            );
            *last = Some(now);
        }
        due
    }
}

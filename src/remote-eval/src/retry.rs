//! Bounded retry loop with exponential backoff around the circuit breaker

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::classifier::classify;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::fallback::FallbackBuilder;
use crate::types::{CircuitState, EvaluationOutcome, EvaluationResponse, FailureErrorType};

/// Upper bound on a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_millis(8000);

/// Delay before the attempt following `attempt` (1-based):
/// `base_delay * multiplier^(attempt - 1)`, capped at [`MAX_BACKOFF`]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let delay_ms = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = delay_ms.min(MAX_BACKOFF.as_millis() as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Drives attempts of one logical request through a shared breaker
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    config: RetryConfig,
    fallback: FallbackBuilder,
}

impl RetryOrchestrator {
    pub fn new(config: RetryConfig, fallback: FallbackBuilder) -> Self {
        Self { config, fallback }
    }

    /// Run `attempt` until it succeeds, fails permanently, the circuit opens
    /// or attempts run out. Never returns an error: every failure path ends
    /// in a fail-closed [`FailureResponse`](crate::types::FailureResponse).
    ///
    /// The backoff sleep only suspends the calling task.
    pub async fn run<F, Fut>(&self, breaker: &CircuitBreaker, mut attempt: F) -> EvaluationOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<EvaluationResponse>>,
    {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt_no in 1..=max_attempts {
            // Pre-flight check, saves an attempt when the circuit is known open
            if let Some(rejection) = breaker.reject_if_open() {
                return self.fallback.rejected(rejection).into();
            }

            let error = match breaker.call(|| attempt()).await {
                Ok(response) => return response.into(),
                Err(BreakerError::Rejected(rejection)) => {
                    return self.fallback.rejected(rejection).into();
                }
                Err(BreakerError::Failed {
                    error,
                    state,
                    failure_count,
                }) => {
                    let class = classify(&error);

                    if state == CircuitState::Open {
                        debug!(
                            attempt = attempt_no,
                            error = %error,
                            "Circuit opened during auth evaluation, not retrying"
                        );
                        return self
                            .fallback
                            .service_failure(class.failure_type(), state, failure_count)
                            .into();
                    }

                    if !class.is_retryable() {
                        debug!(
                            attempt = attempt_no,
                            error = %error,
                            class = ?class,
                            "Non-retryable auth evaluation error"
                        );
                        return self
                            .fallback
                            .service_failure(class.failure_type(), state, failure_count)
                            .into();
                    }
                    error
                }
            };

            if attempt_no < max_attempts {
                let delay = backoff_delay(&self.config, attempt_no);
                debug!(
                    attempt = attempt_no,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying auth evaluation request"
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.fallback
            .service_failure(
                FailureErrorType::ServiceError,
                breaker.get_state(),
                breaker.failure_count(),
            )
            .into()
    }
}

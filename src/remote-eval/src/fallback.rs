//! Fail-closed denial responses synthesized when the evaluator cannot answer

use crate::circuit_breaker::Rejection;
use crate::types::{CircuitState, FailureErrorType, FailureMetadata, FailureResponse};

pub const UNAVAILABLE_REASON: &str = "Authorization evaluation service is temporarily unavailable";
pub const NOT_RUNNING_REASON: &str = "Authorization evaluation service is not running";
pub const FAILED_REASON: &str = "Authorization evaluation failed";

/// Builds [`FailureResponse`]s; every response denies access
#[derive(Debug, Clone, Copy)]
pub struct FallbackBuilder {
    retry_after_ms: u64,
}

impl FallbackBuilder {
    /// `reset_timeout_ms` becomes the `retry_after_ms` of every response
    pub fn new(reset_timeout_ms: u64) -> Self {
        Self {
            retry_after_ms: reset_timeout_ms,
        }
    }

    /// The circuit refused the call without contacting the transport
    pub fn circuit_open(&self, state: CircuitState, failure_count: u64) -> FailureResponse {
        self.build(UNAVAILABLE_REASON, state, failure_count, None)
    }

    pub fn rejected(&self, rejection: Rejection) -> FailureResponse {
        self.circuit_open(rejection.state, rejection.failure_count)
    }

    /// The call reached the transport and ultimately failed
    pub fn service_failure(
        &self,
        error_type: FailureErrorType,
        state: CircuitState,
        failure_count: u64,
    ) -> FailureResponse {
        let reason = match (error_type, state) {
            (FailureErrorType::NoSubscribers, _) => NOT_RUNNING_REASON,
            (FailureErrorType::ServiceError, CircuitState::Open) => UNAVAILABLE_REASON,
            (FailureErrorType::ServiceError, _) => FAILED_REASON,
        };
        self.build(reason, state, failure_count, Some(error_type))
    }

    fn build(
        &self,
        reason: &str,
        circuit_state: CircuitState,
        failure_count: u64,
        error_type: Option<FailureErrorType>,
    ) -> FailureResponse {
        FailureResponse {
            allowed: false,
            reason: reason.to_string(),
            metadata: FailureMetadata {
                circuit_state,
                failure_count,
                error_type,
            },
            retry_after_ms: self.retry_after_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_response() {
        let builder = FallbackBuilder::new(30_000);
        let response = builder.circuit_open(CircuitState::Open, 5);

        assert!(!response.allowed);
        assert_eq!(response.reason, UNAVAILABLE_REASON);
        assert_eq!(response.retry_after_ms, 30_000);
        assert_eq!(response.metadata.circuit_state, CircuitState::Open);
        assert_eq!(response.metadata.failure_count, 5);
        assert_eq!(response.metadata.error_type, None);
    }

    #[test]
    fn test_service_failure_responses() {
        let builder = FallbackBuilder::new(100);

        let down =
            builder.service_failure(FailureErrorType::NoSubscribers, CircuitState::Closed, 1);
        assert!(!down.allowed);
        assert_eq!(down.reason, NOT_RUNNING_REASON);
        assert_eq!(down.metadata.error_type, Some(FailureErrorType::NoSubscribers));

        let tripped =
            builder.service_failure(FailureErrorType::ServiceError, CircuitState::Open, 3);
        assert_eq!(tripped.reason, UNAVAILABLE_REASON);
        assert_eq!(tripped.retry_after_ms, 100);

        let exhausted =
            builder.service_failure(FailureErrorType::ServiceError, CircuitState::Closed, 2);
        assert_eq!(exhausted.reason, FAILED_REASON);
        assert_eq!(exhausted.metadata.error_type, Some(FailureErrorType::ServiceError));
    }
}

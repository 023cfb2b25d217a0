//! Request, response and failure types exchanged with the remote evaluator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the agent whose access is being checked
pub type AgentId = String;

/// Identifier of the authorization policy to evaluate against
pub type PolicyId = String;

/// Authorization evaluation request sent to the remote evaluator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Agent requesting access
    pub agent_id: AgentId,

    /// Policy that governs the resource
    pub authorization_policy_id: PolicyId,

    /// Privilege being requested (e.g. "READ", "UPDATE")
    pub privilege: String,
}

impl EvaluationRequest {
    /// Create a new evaluation request
    pub fn new(
        agent_id: impl Into<AgentId>,
        authorization_policy_id: impl Into<PolicyId>,
        privilege: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            authorization_policy_id: authorization_policy_id.into(),
            privilege: privilege.into(),
        }
    }
}

/// Answer produced by the remote evaluator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    /// Whether the privilege is granted
    pub allowed: bool,

    /// Human-readable explanation
    pub reason: String,
}

impl EvaluationResponse {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Circuit breaker states following the classic pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - all requests pass through
    Closed,
    /// Failing state - reject all requests immediately
    Open,
    /// Testing recovery - a single probe is allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_metric_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Why a locally synthesized denial was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureErrorType {
    /// Nobody is listening on the evaluation subject: the service is down
    #[serde(rename = "no-subscribers")]
    NoSubscribers,
    /// Any other service failure (timeouts, retries exhausted, unknown errors)
    #[serde(rename = "service-error")]
    ServiceError,
}

impl fmt::Display for FailureErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureErrorType::NoSubscribers => f.write_str("no-subscribers"),
            FailureErrorType::ServiceError => f.write_str("service-error"),
        }
    }
}

/// Diagnostic details attached to a [`FailureResponse`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMetadata {
    pub circuit_state: CircuitState,
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<FailureErrorType>,
}

/// Fail-closed denial synthesized locally when the evaluator cannot answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResponse {
    /// Always `false`
    pub allowed: bool,
    pub reason: String,
    pub metadata: FailureMetadata,
    /// Hint for callers; always the configured reset timeout
    pub retry_after_ms: u64,
}

/// Result of a guarded evaluation: a real answer or a local denial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationOutcome {
    Failed(FailureResponse),
    Evaluated(EvaluationResponse),
}

impl EvaluationOutcome {
    /// Whether access is granted. Local failures are never granted.
    pub fn allowed(&self) -> bool {
        match self {
            EvaluationOutcome::Evaluated(response) => response.allowed,
            EvaluationOutcome::Failed(_) => false,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            EvaluationOutcome::Evaluated(response) => &response.reason,
            EvaluationOutcome::Failed(failure) => &failure.reason,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EvaluationOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureResponse> {
        match self {
            EvaluationOutcome::Failed(failure) => Some(failure),
            EvaluationOutcome::Evaluated(_) => None,
        }
    }
}

impl From<EvaluationResponse> for EvaluationOutcome {
    fn from(response: EvaluationResponse) -> Self {
        EvaluationOutcome::Evaluated(response)
    }
}

impl From<FailureResponse> for EvaluationOutcome {
    fn from(failure: FailureResponse) -> Self {
        EvaluationOutcome::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = EvaluationRequest::new("agent-123", "policy-456", "READ");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["agentId"], "agent-123");
        assert_eq!(json["authorizationPolicyId"], "policy-456");
        assert_eq!(json["privilege"], "READ");
    }

    #[test]
    fn test_failure_response_wire_format() {
        let failure = FailureResponse {
            allowed: false,
            reason: "unavailable".to_string(),
            metadata: FailureMetadata {
                circuit_state: CircuitState::HalfOpen,
                failure_count: 4,
                error_type: Some(FailureErrorType::NoSubscribers),
            },
            retry_after_ms: 1000,
        };
        let json = serde_json::to_value(&failure).unwrap();

        assert_eq!(json["metadata"]["circuitState"], "half-open");
        assert_eq!(json["metadata"]["errorType"], "no-subscribers");
        assert_eq!(json["retryAfterMs"], 1000);
    }

    #[test]
    fn test_outcome_fail_closed() {
        let failure = FailureResponse {
            allowed: false,
            reason: "down".to_string(),
            metadata: FailureMetadata {
                circuit_state: CircuitState::Open,
                failure_count: 0,
                error_type: None,
            },
            retry_after_ms: 0,
        };

        assert!(!EvaluationOutcome::from(failure).allowed());
        assert!(EvaluationOutcome::from(EvaluationResponse::allow("ok")).allowed());
    }

    #[test]
    fn test_state_u8_round_trip() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(CircuitState::from_u8(state.as_u8()), state);
        }
    }
}

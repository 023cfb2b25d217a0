//! Resilient remote authorization evaluation for CretoAI
//!
//! Authorization decisions are delegated to a remote evaluator reached over a
//! request/reply message transport. Every call is guarded so that a slow or
//! absent evaluator can never grant access or stall callers indefinitely.
//!
//! ## Architecture
//!
//! A request flows through four layers:
//! 1. **Retry**: bounded attempts with exponential backoff
//! 2. **Circuit Breaker**: Closed / Open / HalfOpen over a rolling failure window
//! 3. **Adapter**: serialization plus a hard per-attempt timeout
//! 4. **Transport**: the message bus itself
//!
//! Any failure on the way is classified and turned into a fail-closed
//! [`FailureResponse`] carrying the circuit state and a retry hint.

pub mod adapter;
pub mod circuit_breaker;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod observability;
pub mod retry;
pub mod rolling;
pub mod transport;
pub mod types;

pub use adapter::TransportAdapter;
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitStats, Rejection};
pub use classifier::{classify, classify_message, ErrorClass};
pub use client::RemoteEvaluationClient;
pub use config::{CircuitConfig, RemoteEvalConfig, RetryConfig};
pub use error::{RemoteEvalError, Result};
pub use fallback::FallbackBuilder;
pub use observability::{CircuitEvent, CircuitMetrics, EventHooks};
pub use retry::{backoff_delay, RetryOrchestrator, MAX_BACKOFF};
pub use rolling::{RollingCounts, RollingWindow};
pub use transport::{IncomingRequest, LocalBus, MessageTransport, Subscription};
pub use types::{
    AgentId, CircuitState, EvaluationOutcome, EvaluationRequest, EvaluationResponse,
    FailureErrorType, FailureMetadata, FailureResponse, PolicyId,
};

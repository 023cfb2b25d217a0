//! Public entry point: guarded authorization checks against the remote evaluator

use prometheus::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::adapter::TransportAdapter;
use crate::circuit_breaker::{CircuitBreaker, CircuitStats};
use crate::config::RemoteEvalConfig;
use crate::error::Result;
use crate::fallback::FallbackBuilder;
use crate::retry::RetryOrchestrator;
use crate::transport::MessageTransport;
use crate::types::{EvaluationOutcome, EvaluationRequest};

/// Resilient client for the remote authorization evaluator
///
/// Clones share the transport and the circuit breaker, so every clone
/// contributes to, and is governed by, the same failure accounting.
#[derive(Clone)]
pub struct RemoteEvaluationClient {
    config: Arc<RemoteEvalConfig>,
    adapter: TransportAdapter,
    breaker: Arc<CircuitBreaker>,
    retry: RetryOrchestrator,
    started: Arc<AtomicBool>,
}

impl RemoteEvaluationClient {
    /// Build a client whose breaker metrics are not exported
    pub fn new(config: RemoteEvalConfig, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        config.validate()?;
        let breaker =
            CircuitBreaker::new(config.queue_name.clone(), config.circuit_breaker.clone())?;
        Ok(Self::assemble(config, transport, breaker))
    }

    /// Build a client registering breaker metrics with `registry`
    pub fn with_registry(
        config: RemoteEvalConfig,
        transport: Arc<dyn MessageTransport>,
        registry: &Registry,
    ) -> Result<Self> {
        config.validate()?;
        let breaker = CircuitBreaker::new_with_registry(
            config.queue_name.clone(),
            config.circuit_breaker.clone(),
            registry,
        )?;
        Ok(Self::assemble(config, transport, breaker))
    }

    fn assemble(
        config: RemoteEvalConfig,
        transport: Arc<dyn MessageTransport>,
        breaker: CircuitBreaker,
    ) -> Self {
        let adapter = TransportAdapter::new(
            transport,
            config.queue_name.clone(),
            config.circuit_breaker.timeout(),
        );
        let retry = RetryOrchestrator::new(
            config.retry.clone(),
            FallbackBuilder::new(config.circuit_breaker.reset_timeout_ms),
        );

        Self {
            config: Arc::new(config),
            adapter,
            breaker: Arc::new(breaker),
            retry,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect the transport. Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.adapter.transport().connect().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            subject = %self.config.queue_name,
            circuit_breaker = self.config.circuit_breaker.enabled,
            "Remote auth evaluation client started"
        );
        Ok(())
    }

    /// Close the transport. Idempotent; in-flight calls are not awaited.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.adapter.transport().close().await?;
        info!(subject = %self.config.queue_name, "Remote auth evaluation client stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Evaluate an authorization request
    ///
    /// With the circuit breaker enabled this never returns `Err`: every
    /// failure becomes a fail-closed [`EvaluationOutcome::Failed`]. With it
    /// disabled the call goes straight to the transport and errors propagate.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationOutcome> {
        let span = tracing::debug_span!(
            "auth_evaluation",
            request_id = %Uuid::new_v4(),
            agent_id = %request.agent_id,
            policy_id = %request.authorization_policy_id,
            privilege = %request.privilege,
        );

        async {
            if !self.config.circuit_breaker.enabled {
                return self.adapter.send(request).await.map(EvaluationOutcome::from);
            }

            let outcome = self
                .retry
                .run(&self.breaker, || self.adapter.send(request))
                .await;

            if let Some(failure) = outcome.failure() {
                debug!(
                    circuit_state = %failure.metadata.circuit_state,
                    failure_count = failure.metadata.failure_count,
                    "Auth evaluation denied locally"
                );
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Fail-closed boolean check; any error counts as a denial
    pub async fn is_allowed(&self, request: &EvaluationRequest) -> bool {
        match self.evaluate(request).await {
            Ok(outcome) => outcome.allowed(),
            Err(e) => {
                warn!(error = %e, "Auth evaluation failed, denying access");
                false
            }
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> CircuitStats {
        self.breaker.get_stats()
    }

    pub fn config(&self) -> &RemoteEvalConfig {
        &self.config
    }
}

//! Typed evaluation requests over a [`MessageTransport`], bounded by a hard timeout

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{trace, warn};

use crate::error::{RemoteEvalError, Result};
use crate::transport::MessageTransport;
use crate::types::{EvaluationRequest, EvaluationResponse};

/// Sends evaluation requests on one subject and decodes the replies
#[derive(Clone)]
pub struct TransportAdapter {
    transport: Arc<dyn MessageTransport>,
    subject: String,
    timeout: Duration,
}

impl TransportAdapter {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        subject: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            subject: subject.into(),
            timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    /// One round trip to the remote evaluator
    ///
    /// Transport errors are returned as-is for classification; exceeding the
    /// timeout yields [`RemoteEvalError::Timeout`].
    pub async fn send(&self, request: &EvaluationRequest) -> Result<EvaluationResponse> {
        let payload = serde_json::to_vec(request)?;
        let start = Instant::now();

        let round_trip = self.transport.request(&self.subject, payload);
        let reply = match timeout(self.timeout, round_trip).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                if let RemoteEvalError::NoSubscribers(_) = error {
                    warn!(
                        subject = %self.subject,
                        "Auth evaluation service unavailable: no subscribers listening"
                    );
                }
                return Err(error);
            }
            Err(_) => return Err(RemoteEvalError::Timeout(self.timeout.as_millis() as u64)),
        };

        trace!(
            subject = %self.subject,
            latency_ms = start.elapsed().as_millis() as u64,
            "Auth evaluation round trip completed"
        );

        Ok(serde_json::from_slice(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBus;

    fn adapter(bus: &LocalBus, timeout_ms: u64) -> TransportAdapter {
        TransportAdapter::new(
            Arc::new(bus.clone()),
            "auth.evaluate",
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let bus = LocalBus::new();
        bus.connect().await.unwrap();

        let mut sub = bus.subscribe("auth.evaluate", 4);
        tokio::spawn(async move {
            while let Some(req) = sub.recv().await {
                let request: EvaluationRequest = serde_json::from_slice(&req.payload).unwrap();
                let response = EvaluationResponse {
                    allowed: request.privilege == "READ",
                    reason: format!("checked {}", request.agent_id),
                };
                req.respond(serde_json::to_vec(&response).unwrap());
            }
        });

        let response = adapter(&bus, 500)
            .send(&EvaluationRequest::new("agent-1", "policy-1", "READ"))
            .await
            .unwrap();

        assert_eq!(response, EvaluationResponse::allow("checked agent-1"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let bus = LocalBus::new();
        bus.connect().await.unwrap();

        // Subscriber that never answers
        let mut sub = bus.subscribe("auth.evaluate", 4);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(req) = sub.recv().await {
                held.push(req);
            }
        });

        let err = adapter(&bus, 50)
            .send(&EvaluationRequest::new("agent-1", "policy-1", "READ"))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteEvalError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_no_subscribers_propagated() {
        let bus = LocalBus::new();
        bus.connect().await.unwrap();

        let err = adapter(&bus, 50)
            .send(&EvaluationRequest::new("agent-1", "policy-1", "READ"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RemoteEvalError::NoSubscribers(subject) if subject == "auth.evaluate"
        ));
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let bus = LocalBus::new();
        bus.connect().await.unwrap();

        let mut sub = bus.subscribe("auth.evaluate", 1);
        tokio::spawn(async move {
            if let Some(req) = sub.recv().await {
                req.respond(b"not json".to_vec());
            }
        });

        let err = adapter(&bus, 500)
            .send(&EvaluationRequest::new("agent-1", "policy-1", "READ"))
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteEvalError::Serialization(_)));
    }
}

//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cretoai_remote_eval::{
    EvaluationRequest, EvaluationResponse, MessageTransport, RemoteEvalConfig, RemoteEvalError,
    Result,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// What the scripted evaluator does with one request
#[derive(Debug, Clone)]
pub enum Step {
    Reply(EvaluationResponse),
    Fail(RemoteEvalError),
    /// Answer after a delay
    Delayed(Duration, EvaluationResponse),
    /// Never answer; the adapter timeout has to fire
    Hang,
}

impl Step {
    pub fn allow() -> Self {
        Step::Reply(EvaluationResponse::allow("Policy conditions satisfied"))
    }

    pub fn timeout() -> Self {
        Step::Fail(RemoteEvalError::Timeout(3000))
    }

    pub fn no_subscribers() -> Self {
        Step::Fail(RemoteEvalError::NoSubscribers("auth.evaluate".into()))
    }
}

/// Transport replaying a script, then repeating a fallback step
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    invocations: AtomicUsize,
    connected: AtomicBool,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            invocations: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
        }
    }

    /// Always behaves the same way
    pub fn always(step: Step) -> Self {
        Self::new(Vec::new(), step)
    }

    /// Change the behavior once the script has run out
    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock() = step;
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request(&self, _subject: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let _request: EvaluationRequest = serde_json::from_slice(&payload)?;

        match self.next_step() {
            Step::Reply(response) => Ok(serde_json::to_vec(&response)?),
            Step::Fail(error) => Err(error),
            Step::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(serde_json::to_vec(&response)?)
            }
            Step::Hang => futures::future::pending().await,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Configuration with short timings suitable for tests
pub fn fast_config(
    failure_threshold: u64,
    reset_timeout_ms: u64,
    max_attempts: u32,
) -> RemoteEvalConfig {
    let mut config = RemoteEvalConfig::default();
    config.circuit_breaker.timeout_ms = 50;
    config.circuit_breaker.failure_threshold = failure_threshold;
    config.circuit_breaker.reset_timeout_ms = reset_timeout_ms;
    config.retry.max_attempts = max_attempts;
    config.retry.base_delay_ms = 5;
    config
}

pub fn request() -> EvaluationRequest {
    EvaluationRequest::new("agent-123", "policy-456", "READ")
}

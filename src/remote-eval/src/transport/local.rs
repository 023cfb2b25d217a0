//! In-process request/reply bus
//!
//! Responders subscribe to a subject and receive [`IncomingRequest`]s, each
//! carrying a one-shot reply handle. Requests on a subject without a live
//! subscriber fail the same way a broker reports "no subscribers listening".

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::MessageTransport;
use crate::error::{RemoteEvalError, Result};

type Reply = std::result::Result<Vec<u8>, String>;

/// Request delivered to a subscriber
#[derive(Debug)]
pub struct IncomingRequest {
    pub subject: String,
    pub payload: Vec<u8>,
    reply: oneshot::Sender<Reply>,
}

impl IncomingRequest {
    /// Send a successful reply. Returns false if the requester has gone away.
    pub fn respond(self, payload: Vec<u8>) -> bool {
        self.reply.send(Ok(payload)).is_ok()
    }

    /// Reply with an error message
    pub fn respond_error(self, message: impl Into<String>) -> bool {
        self.reply.send(Err(message.into())).is_ok()
    }
}

/// Receiving end of a subject subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<IncomingRequest>,
}

impl Subscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the next request
    pub async fn recv(&mut self) -> Option<IncomingRequest> {
        self.receiver.recv().await
    }
}

/// Cloneable in-process bus; all clones share subscribers and connection state
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    connected: AtomicBool,
    subjects: RwLock<HashMap<String, Vec<mpsc::Sender<IncomingRequest>>>>,
    next_subscriber: AtomicUsize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a subject with a bounded inbox
    pub fn subscribe(&self, subject: impl Into<String>, capacity: usize) -> Subscription {
        let subject = subject.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        self.inner
            .subjects
            .write()
            .entry(subject.clone())
            .or_default()
            .push(sender);

        debug!(subject = %subject, "Subscriber registered");
        Subscription { subject, receiver }
    }

    /// Number of live subscribers on a subject
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.inner
            .subjects
            .read()
            .get(subject)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Pick a live subscriber round-robin, pruning closed ones
    fn pick_subscriber(&self, subject: &str) -> Option<mpsc::Sender<IncomingRequest>> {
        let mut subjects = self.inner.subjects.write();
        let subscribers = subjects.get_mut(subject)?;
        subscribers.retain(|s| !s.is_closed());

        if subscribers.is_empty() {
            subjects.remove(subject);
            return None;
        }

        let index = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed) % subscribers.len();
        Some(subscribers[index].clone())
    }
}

#[async_trait]
impl MessageTransport for LocalBus {
    async fn connect(&self) -> Result<()> {
        if !self.inner.connected.swap(true, Ordering::SeqCst) {
            debug!("Local bus connected");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            debug!("Local bus closed");
        }
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(RemoteEvalError::NotConnected);
        }

        let subscriber = self
            .pick_subscriber(subject)
            .ok_or_else(|| RemoteEvalError::NoSubscribers(subject.to_string()))?;

        let (reply, reply_rx) = oneshot::channel();
        let request = IncomingRequest {
            subject: subject.to_string(),
            payload,
            reply,
        };

        subscriber
            .send(request)
            .await
            .map_err(|_| RemoteEvalError::NoSubscribers(subject.to_string()))?;

        match reply_rx.await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(message)) => Err(RemoteEvalError::Service(message)),
            Err(_) => Err(RemoteEvalError::Connection(format!(
                "responder on '{}' dropped the request without replying",
                subject
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

//! Request/reply message transport abstraction

mod local;

pub use local::{IncomingRequest, LocalBus, Subscription};

use crate::error::Result;
use async_trait::async_trait;

/// Request/reply transport over named subjects
///
/// Implementations must report a missing listener as
/// [`RemoteEvalError::NoSubscribers`](crate::error::RemoteEvalError::NoSubscribers)
/// so callers can tell a stopped service from a slow one.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Establish the connection. Calling it again is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Close the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    /// Send `payload` on `subject` and wait for the reply
    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>>;

    /// Whether the transport is currently connected
    fn is_connected(&self) -> bool;
}

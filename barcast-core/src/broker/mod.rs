//! Message broker abstraction.
//!
//! Relay loops publish serialized bars through a [`BarBus`] without knowing
//! what sits behind it. [`RedisBus`] is the production implementation;
//! [`MemoryBus`] backs tests and single-process consumers.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::MemoryBus;
pub use redis::RedisBus;

pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;

/// Custom result type for broker operations
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Publish failed: {message}")]
    Publish { message: String },

    #[error("Subscribe failed: {message}")]
    Subscribe { message: String },
}

/// One message delivered to a pattern subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw payload bytes as published.
    pub payload: Vec<u8>,
}

/// Receiving half of a pattern subscription.
///
/// Events arrive in publish order per channel. Dropping the subscription
/// detaches it from the bus.
pub struct Subscription {
    pattern: String,
    receiver: mpsc::Receiver<BusEvent>,
}

impl Subscription {
    pub(crate) fn new(pattern: String, receiver: mpsc::Receiver<BusEvent>) -> Self {
        Self { pattern, receiver }
    }

    /// The glob pattern this subscription was opened with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Waits for the next matching event. `None` means the bus side closed.
    pub async fn next_event(&mut self) -> Option<BusEvent> {
        self.receiver.recv().await
    }
}

/// Publish/subscribe transport for serialized bar messages.
#[async_trait]
pub trait BarBus: Send + Sync {
    /// Publish one payload on a channel. Fan-out to subscribers is the bus's
    /// concern; publishing to a channel nobody listens on succeeds.
    async fn publish(&self, channel: &str, payload: &[u8]) -> BusResult<()>;

    /// Open a glob-pattern subscription (`*` and `?`, Redis `PSUBSCRIBE`
    /// semantics with `*` crossing `/` boundaries).
    async fn subscribe_pattern(&self, pattern: &str) -> BusResult<Subscription>;
}

//! Broker plumbing: connection establishment, topology declaration,
//! the consumer loop, and the notification publisher.

use async_trait::async_trait;

use crate::events::{DecodeError, NotificationEvent};

pub mod connector;
pub mod consumer;
pub mod publisher;

pub use consumer::EventConsumer;
pub use publisher::NotificationPublisher;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Broker unreachable or auth failure at connect time. Recovered by
    /// bounded retry; exhaustion is fatal.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Conflicting exchange/queue declaration. A configuration defect,
    /// never retried.
    #[error("topology declaration failed: {0}")]
    Topology(String),

    /// Unusable inbound message. Dropped per-message, processing continues.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The notification could not be handed to the broker.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Steady-state channel failure. Fatal to the owning worker.
    #[error("channel failure: {0}")]
    Channel(String),
}

/// Destination for transformed notification events.
///
/// The consumer loop only depends on this seam, so tests can swap the real
/// publisher for a recording mock.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: &NotificationEvent) -> Result<()>;
}

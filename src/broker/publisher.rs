//! Notification publisher.
//!
//! Owns its own connection pool, separate from the consumer's session, and
//! declares the output topology at construction so the publish side works
//! even when the consumer has never run. Each publish takes a fresh channel
//! from the pool, which transparently re-establishes the underlying
//! connection after a broker restart.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_lapin::{Manager, Pool};
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, ConnectionProperties};
use tracing::{debug, info};

use super::{connector, BrokerError, NotificationSink, Result};
use crate::config::BrokerSettings;
use crate::events::NotificationEvent;

/// Connections kept by the publisher pool, one per concurrent queue task.
const POOL_SIZE: usize = 4;

/// Publishes notification events to the delivery queue.
pub struct NotificationPublisher {
    pool: Pool,
    exchange: String,
    routing_key: String,
}

impl NotificationPublisher {
    /// Connect under the bounded retry policy and declare the exchange,
    /// output queue and binding.
    pub async fn connect(broker: &BrokerSettings) -> Result<Self> {
        let manager = Manager::new(broker.amqp_uri(), ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| BrokerError::Connection(format!("failed to build publisher pool: {e}")))?;

        connector::connect_with_retry("publisher", || async {
            let channel = get_channel(&pool).await?;
            connector::declare_exchange(&channel, &broker.exchange).await?;
            connector::declare_bound_queue(
                &channel,
                &broker.exchange,
                &broker.notifications_queue,
                &broker.notifications_routing_key,
            )
            .await
        })
        .await?;

        info!(queue = %broker.notifications_queue, "notification publisher ready");
        Ok(Self {
            pool,
            exchange: broker.exchange.clone(),
            routing_key: broker.notifications_routing_key.clone(),
        })
    }

    /// Close the publisher's pooled connections.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[async_trait]
impl NotificationSink for NotificationPublisher {
    /// Serialize and publish one notification, waiting for the broker
    /// round-trip. The message is flagged persistent so it survives a
    /// broker restart, and stamped with the publish time.
    async fn publish(&self, notification: &NotificationEvent) -> Result<()> {
        let payload = serde_json::to_vec(notification)
            .map_err(|e| BrokerError::Publish(format!("failed to serialize notification: {e}")))?;

        let channel = get_channel(&self.pool)
            .await
            .map_err(|e| BrokerError::Publish(format!("no usable channel: {e}")))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_timestamp(Utc::now().timestamp() as u64);

        let confirm = channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map_err(|e| {
                BrokerError::Publish(format!("failed to publish {:?}: {e}", notification.kind))
            })?;

        confirm
            .await
            .map_err(|e| BrokerError::Publish(format!("publish confirmation failed: {e}")))?;

        debug!(kind = ?notification.kind, email = %notification.email, "notification published");
        Ok(())
    }
}

async fn get_channel(pool: &Pool) -> Result<Channel> {
    let connection = pool
        .get()
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to get broker connection: {e}")))?;

    connection
        .create_channel()
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to open publisher channel: {e}")))
}

//! Consumer loop over the four input queues.
//!
//! Each queue gets its own task, so a slow queue never holds up the others
//! while delivery order within a queue is preserved. Per message the loop
//! decodes, transforms and publishes, then acks on success or nacks without
//! requeue on any failure: a poison message is dropped rather than allowed
//! to block its queue forever.

use std::sync::Arc;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{connector, BrokerError, NotificationSink, Result};
use crate::config::BrokerSettings;
use crate::events::{decode, InputQueue, NotificationKind};
use crate::transform::transform;

/// AMQP reply code for a clean connection close.
const REPLY_SUCCESS: u16 = 200;

/// Consumes domain events from the input queues and feeds them through the
/// transform/publish pipeline.
pub struct EventConsumer {
    connection: Connection,
    queues: Vec<QueueConsumer>,
    sink: Arc<dyn NotificationSink>,
}

struct QueueConsumer {
    queue: InputQueue,
    name: String,
    inner: lapin::Consumer,
}

impl EventConsumer {
    /// Connect (with the bounded retry policy), declare the input topology,
    /// and register one consumer per input queue.
    pub async fn bind(broker: &BrokerSettings, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let connection =
            connector::connect_with_retry("consumer", || connector::open_connection(broker))
                .await?;

        let channel = connection.create_channel().await.map_err(|e| {
            BrokerError::Connection(format!("failed to open consumer channel: {e}"))
        })?;

        connector::declare_exchange(&channel, &broker.exchange).await?;

        let mut queues = Vec::with_capacity(InputQueue::ALL.len());
        for queue in InputQueue::ALL {
            let name = broker.queue_name(queue).to_string();
            connector::declare_bound_queue(&channel, &broker.exchange, &name, queue.routing_key())
                .await?;

            let inner = channel
                .basic_consume(
                    &name,
                    &format!("orchestrator-{name}"),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Channel(format!("failed to start consumer on '{name}': {e}"))
                })?;

            info!(queue = %name, "listening for domain events");
            queues.push(QueueConsumer { queue, name, inner });
        }

        Ok(Self {
            connection,
            queues,
            sink,
        })
    }

    /// Drive all queue consumers until cancelled or a fatal channel failure.
    ///
    /// A steady-state failure in any queue cancels the siblings, lets their
    /// in-flight work finish, and propagates as fatal. Cancellation is
    /// cooperative: a task only stops between messages.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for queue in self.queues.drain(..) {
            tasks.spawn(consume_queue(queue, Arc::clone(&self.sink), cancel.clone()));
        }

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(BrokerError::Channel(format!("consumer task died: {e}"))));
            if let Err(e) = outcome {
                error!(error = %e, "queue consumer failed, stopping all consumers");
                cancel.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Close the consumer's broker connection.
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "shutting down")
            .await
            .map_err(|e| BrokerError::Channel(format!("failed to close consumer connection: {e}")))
    }
}

async fn consume_queue(
    mut queue: QueueConsumer,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => {
                info!(queue = %queue.name, "consumer stopped");
                return Ok(());
            }
            next = queue.inner.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    return Err(BrokerError::Channel(format!(
                        "delivery error on '{}': {e}",
                        queue.name
                    )))
                }
                None => {
                    return Err(BrokerError::Channel(format!(
                        "consumer stream on '{}' closed by broker",
                        queue.name
                    )))
                }
            },
        };

        handle_delivery(queue.queue, &queue.name, delivery, &sink).await?;
    }
}

/// Ack on success; nack without requeue on any processing failure. Failing
/// to ack or nack is a channel failure and therefore fatal.
async fn handle_delivery(
    queue: InputQueue,
    queue_name: &str,
    delivery: Delivery,
    sink: &Arc<dyn NotificationSink>,
) -> Result<()> {
    match process(queue, &delivery.data, sink).await {
        Ok(kind) => {
            debug!(queue = %queue_name, kind = ?kind, "message processed");
            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| BrokerError::Channel(format!("failed to ack on '{queue_name}': {e}")))
        }
        Err(e) => {
            error!(queue = %queue_name, error = %e, "dropping message");
            delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await
                .map_err(|e| BrokerError::Channel(format!("failed to nack on '{queue_name}': {e}")))
        }
    }
}

async fn process(
    queue: InputQueue,
    payload: &[u8],
    sink: &Arc<dyn NotificationSink>,
) -> Result<NotificationKind> {
    let event = decode(queue, payload)?;
    let notification = transform(event);
    let kind = notification.kind;
    sink.publish(&notification).await?;
    info!(kind = ?kind, email = %notification.email, "notification relayed");
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::events::NotificationEvent;

    #[derive(Default)]
    struct RecordingSink {
        published: Mutex<Vec<NotificationEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn publish(&self, notification: &NotificationEvent) -> Result<()> {
            if self.fail {
                return Err(BrokerError::Publish("broker went away".to_string()));
            }
            self.published.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_process_relays_valid_message() {
        let sink: Arc<RecordingSink> = Arc::default();
        let payload =
            br#"{"usuarioId":"u1","email":"a@b.com","nombre":"Ana","timestamp":"2024-01-01T00:00:00Z"}"#;

        let kind = process(
            InputQueue::UserCreated,
            payload,
            &(Arc::clone(&sink) as Arc<dyn NotificationSink>),
        )
        .await
        .unwrap();

        assert_eq!(kind, NotificationKind::UserWelcome);
        let published = sink.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].email, "a@b.com");
        assert_eq!(published[0].user_name, "Ana");
        assert!(published[0].additional_data.is_none());
    }

    #[tokio::test]
    async fn test_process_surfaces_decode_failure() {
        let sink: Arc<RecordingSink> = Arc::default();
        let err = process(
            InputQueue::UserCreated,
            b"{broken",
            &(Arc::clone(&sink) as Arc<dyn NotificationSink>),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BrokerError::Decode(_)));
        assert!(sink.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_surfaces_publish_failure() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let payload =
            br#"{"usuarioId":"u1","email":"a@b.com","nombre":"Ana","timestamp":"2024-01-01T00:00:00Z"}"#;

        let err = process(
            InputQueue::UserCreated,
            payload,
            &(Arc::clone(&sink) as Arc<dyn NotificationSink>),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BrokerError::Publish(_)));
    }
}

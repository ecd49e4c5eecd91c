//! Broker connection establishment and topology declaration.
//!
//! Connection attempts are retried on a fixed interval up to a fixed bound;
//! exhausting all attempts is fatal. Topology declarations are idempotent on
//! the broker side, so re-declaring an existing entity with identical
//! properties is a no-op, while a conflicting declaration surfaces as a
//! [`BrokerError::Topology`] and is never retried.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{error, info, warn};

use super::{BrokerError, Result};
use crate::config::BrokerSettings;

/// Connection attempts before giving up.
const MAX_CONNECT_ATTEMPTS: usize = 20;
/// Fixed delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Open a raw connection to the configured broker. One attempt, no retry.
pub async fn open_connection(broker: &BrokerSettings) -> Result<Connection> {
    Connection::connect(&broker.amqp_uri(), ConnectionProperties::default())
        .await
        .map_err(|e| {
            BrokerError::Connection(format!(
                "failed to connect to {}:{}: {e}",
                broker.host, broker.port
            ))
        })
}

/// Run a connect closure under the bounded fixed-interval retry policy.
///
/// Only [`BrokerError::Connection`] is retried; anything else (notably
/// topology conflicts) aborts immediately. Each failed attempt is logged
/// with its attempt count.
pub async fn connect_with_retry<T, F, Fut>(session: &str, connect: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = ConstantBuilder::default()
        .with_delay(CONNECT_RETRY_DELAY)
        .with_max_times(MAX_CONNECT_ATTEMPTS - 1)
        .build();

    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(value) => {
                info!(session, attempt, "broker connection established");
                return Ok(value);
            }
            Err(e @ BrokerError::Connection(_)) => match backoff.next() {
                Some(delay) => {
                    warn!(
                        session,
                        attempt,
                        max_attempts = MAX_CONNECT_ATTEMPTS,
                        error = %e,
                        "broker connection failed, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(
                        session,
                        attempts = MAX_CONNECT_ATTEMPTS,
                        error = %e,
                        "could not reach broker, giving up"
                    );
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// Declare the shared durable topic exchange.
pub async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Topology(format!("failed to declare exchange '{exchange}': {e}")))
}

/// Declare a durable queue and bind it to the exchange under a routing key.
pub async fn declare_bound_queue(
    channel: &Channel,
    exchange: &str,
    queue: &str,
    routing_key: &str,
) -> Result<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Topology(format!("failed to declare queue '{queue}': {e}")))?;

    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            BrokerError::Topology(format!(
                "failed to bind queue '{queue}' to '{exchange}' under '{routing_key}': {e}"
            ))
        })?;

    info!(queue, routing_key, "queue bound to exchange");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = connect_with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_topology_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = connect_with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Topology("conflicting declaration".to_string()))
        })
        .await;
        assert!(matches!(result, Err(BrokerError::Topology(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_connection_failures() {
        let calls = AtomicUsize::new(0);
        let result = connect_with_retry("test", || async {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 4 {
                Err(BrokerError::Connection("refused".to_string()))
            } else {
                Ok("up")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = connect_with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Connection("refused".to_string()))
        })
        .await;
        assert!(matches!(result, Err(BrokerError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_CONNECT_ATTEMPTS);
    }
}

//! Worker supervision.
//!
//! One dedicated task owns the publisher and the consumer loop for the
//! process lifetime. The HTTP surface only sees a read-only liveness flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerError, EventConsumer, NotificationPublisher, NotificationSink, Result};
use crate::config::Settings;

/// Handle to the worker task hosting the consumer loop and publisher.
pub struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<Result<()>>,
}

/// Read-only view of the worker's liveness, shared with the HTTP surface.
#[derive(Clone)]
pub struct WorkerStatus {
    running: Arc<AtomicBool>,
}

impl WorkerStatus {
    pub(crate) fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Worker {
    /// Spawn the worker task. Cancelling the token requests an ordered
    /// shutdown; a fatal broker error also ends the task.
    pub fn spawn(settings: Settings, cancel: CancellationToken) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&running);
        let handle = tokio::spawn(run(settings, cancel, flag));
        Self { running, handle }
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::new(Arc::clone(&self.running))
    }

    /// Wait for the worker task to finish and return its outcome.
    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .unwrap_or_else(|e| Err(BrokerError::Channel(format!("worker task died: {e}"))))
    }
}

async fn run(
    settings: Settings,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) -> Result<()> {
    // Publisher first: it declares the output topology, so notifications can
    // be delivered even for messages already waiting on the input queues.
    let setup = async {
        let publisher = Arc::new(NotificationPublisher::connect(&settings.broker).await?);
        let sink: Arc<dyn NotificationSink> = publisher.clone();
        let consumer = EventConsumer::bind(&settings.broker, sink).await?;
        Ok::<_, BrokerError>((publisher, consumer))
    };

    let (publisher, mut consumer) = tokio::select! {
        _ = cancel.cancelled() => {
            info!("shutdown requested before broker setup completed");
            return Ok(());
        }
        setup = setup => setup?,
    };

    running.store(true, Ordering::Relaxed);
    info!("worker started, consuming domain events");

    let result = consumer.run(cancel).await;

    running.store(false, Ordering::Relaxed);

    // Ordered teardown: in-flight handlers have already finished by the time
    // run() returns; publisher session goes first, then the consumer's.
    publisher.close();
    if let Err(e) = consumer.close().await {
        warn!(error = %e, "error closing consumer connection");
    }

    info!("worker stopped");
    result
}

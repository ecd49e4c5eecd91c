//! notification-orchestrator service binary.
//!
//! Starts the broker worker (consumer loop + publisher) on its own task and
//! serves the health/metrics surface until a shutdown signal arrives. The
//! signal handler only requests cancellation; the worker performs its own
//! ordered teardown.

use std::future::IntoFuture;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notification_orchestrator::config::{Settings, LOG_ENV_VAR};
use notification_orchestrator::http::{self, AppState};
use notification_orchestrator::worker::Worker;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_tracing(&settings.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}", settings.app_name
    );
    info!(
        host = %settings.broker.host,
        port = settings.broker.port,
        exchange = %settings.broker.exchange,
        "broker target"
    );

    let cancel = CancellationToken::new();
    let worker = Worker::spawn(settings.clone(), cancel.clone());

    let state = AppState {
        service: settings.app_name.clone(),
        worker: worker.status(),
    };
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!(port = settings.port, "http surface listening");

    let server = tokio::spawn(
        axum::serve(listener, http::router(state))
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future(),
    );

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, stopping worker");
            cancel.cancel();
        }
    });

    // The worker ends on cancellation or on a fatal broker error; either way
    // the http surface comes down with it.
    let result = worker.join().await;
    cancel.cancel();
    if let Err(e) = server.await? {
        warn!(error = %e, "http server error");
    }

    match result {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "worker terminated fatally");
            Err(e.into())
        }
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

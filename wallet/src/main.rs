//! Wallet service HTTP server.
//!
//! Event-sourced wallet commands and queries with a transfer saga,
//! idempotent HTTP edge, and asynchronous projection/fraud consumers.

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walletd::{bootstrap, config::Config, server::build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "walletd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wallet service");

    let config = Config::from_env();
    info!(
        event_store_url = %config.event_store.url,
        projection_url = %config.projections.url,
        fraud_url = %config.fraud.url,
        brokers = %config.redpanda.brokers,
        "Configuration loaded"
    );

    let app = bootstrap::build(&config).await?;
    let router = build_router(app.state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining background tasks");
    let _ = app.shutdown.send(());

    let drain = async {
        for handle in app.background {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(
        std::time::Duration::from_secs(config.server.shutdown_timeout),
        drain,
    )
    .await
    .is_err()
    {
        warn!("Background tasks did not drain within the shutdown timeout");
    }

    info!("Wallet service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

//! Real-time pub/sub gateway binary: loads configuration, wires the
//! shared engine and endpoint specializations, and serves WebSocket
//! connections until shutdown.

use gateway_core::config::Config;
use gateway_core::observability::init_tracing;

use gateway_service::wiring;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_for_service("realtime-gateway")?;
    init_tracing(&config)?;

    let port = config.service.port;
    let services = wiring::build_services(config).await;
    wiring::spawn_background_loops(&services);

    let app = wiring::router(&services);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "gateway listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    wiring::shutdown(&services).await;
    Ok(())
}

/// Waits for SIGINT/SIGTERM, matching the teacher's `Server::serve`
/// graceful-shutdown signal handling.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

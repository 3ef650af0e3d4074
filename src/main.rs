use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use exchange_guard::sink::{Notifier, TracingLogSink, TracingNotifier, WebhookNotifier};
use exchange_guard::{AppState, Config, LogFormat, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // LOG_FORMAT is read before the rest of the config so config errors are
    // logged in the requested format.
    let _ = dotenvy::dotenv();
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_tracing(format);

    info!("Starting Exchange Guard v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        log_request = config.log_request,
        safe_fields = config.safe_fields.len(),
        incident_threshold = config.incident_threshold,
        webhook = config.incident_webhook_url.is_some(),
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    let notifier: Arc<dyn Notifier> = match &config.incident_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone()).map_err(|e| {
            error!("Failed to build incident webhook client: {e}");
            exitcode::CONFIG
        })?),
        None => {
            info!("No INCIDENT_WEBHOOK_URL set, incidents are logged locally");
            Arc::new(TracingNotifier)
        }
    };

    let state =
        AppState::new(config.clone(), Arc::new(TracingLogSink), notifier).map_err(|e| {
            error!("Failed to build application state: {e}");
            exitcode::CONFIG
        })?;
    let app = build_router(state.clone());

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health           - Health check");
    info!("  POST /echo             - Echo a JSON payload");

    // ConnectInfo supplies the peer address when no proxy headers are present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use signature_auth::signature::{KeyStrength, validate_secret_key};
use signature_auth::{AppState, Config, build_router, metrics, nonce, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is loaded first so a .env file can set RUST_LOG.
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(
        "Starting Signature Auth service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    let key = validate_secret_key(config.secret_key.expose_str());
    if key.strength == KeyStrength::Weak {
        for warning in &key.warnings {
            warn!(strength = %key.strength, "Secret key: {warning}");
        }
        for recommendation in &key.recommendations {
            warn!("Secret key recommendation: {recommendation}");
        }
    } else {
        info!(strength = %key.strength, "Secret key validated");
    }

    info!(
        host = %config.host,
        port = %config.port,
        window_secs = config.validity_window.as_secs(),
        shared_cache = config.cache_url.is_some(),
        debug_mode = config.debug_mode,
        "Configuration loaded"
    );
    if config.debug_mode {
        warn!("Debug mode is enabled; 401 responses include diagnostic details");
    }

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    // Select nonce store
    let cache = nonce::connect_shared_cache(&config).await;
    let store = nonce::select_nonce_store(cache, &config).await.map_err(|e| {
        error!("Failed to initialize nonce store: {e}");
        exitcode::UNAVAILABLE
    })?;

    let state = AppState::new(config.clone(), store).map_err(|e| {
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
    info!("Endpoints:");
    info!("  GET  /health                 - Health check");
    info!("  GET  /health/signature       - Nonce store report");
    info!("  GET  /api/ping               - Signed ping");
    info!("  POST /api/echo               - Signed echo");
    info!("  GET  /api/shop/products/     - List products");
    info!("  POST /api/shop/products/     - Create product");

    // Client IPs fall back to the peer address when no forwarding header is set.
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

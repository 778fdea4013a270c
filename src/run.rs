//! Server startup.

use axum::Router;
use axum::http::{HeaderName, Method};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::config::Config;
use crate::handlers;
use crate::state::AppState;
use crate::util::{SigDown, Telemetry};

/// Runs the x402-chat server until SIGTERM or SIGINT.
///
/// - Loads `.env` variables.
/// - Initializes logging and, when configured, OpenTelemetry export.
/// - Opens the ledger and wires the facilitator and engine clients.
/// - Serves the HTTP API behind CORS and request tracing.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Already installed is fine.
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let state = AppState::from_config(&config)?;
    tracing::info!(
        database = %config.database().display(),
        facilitator = %config.facilitator().url.inner(),
        post_asset = %state.oracle.post_asset().address,
        "Ledger opened"
    );

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(Arc::new(state)))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any)
                .expose_headers([HeaderName::from_static("x-payment-response")]),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;
    sig_down.recv().await;

    tracing::info!("Server stopped");
    Ok(())
}

//! # Transcribe Relay - Main Application Entry Point
//!
//! Accepts raw audio over WebSocket, forwards it to a remote speech-to-text
//! HTTP API and relays the text back to the client.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **transcription**: Remote transcription client behind the `Transcriber` trait
//! - **relay**: Stage → transcribe → respond → clean up, for one payload
//! - **websocket**: Per-connection actor feeding payloads into the relay
//! - **state**: Shared configuration, transcriber, storage and metrics
//! - **health / handlers / middleware**: Health, metrics and config endpoints
//! - **error**: Relay and HTTP error types

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod relay;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::relay::TransientStorage;
use crate::state::AppState;
use crate::transcription::TranscriptionClient;

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        endpoint = %config.transcription.endpoint_url,
        temp_dir = %config.relay.temp_dir.display(),
        "Configuration loaded"
    );

    let client = TranscriptionClient::new(&config.transcription)?;
    let storage = TransientStorage::new(config.relay.temp_dir.clone());
    let bind_addr = (config.server.host.clone(), config.server.port);
    let app_state = AppState::new(config, Arc::new(client), storage);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::relay_websocket))
            // Upgrades on the root path as well, for clients that don't pick a path
            .route("/", web::get().to(websocket::relay_websocket))
            .default_service(web::to(handlers::not_found))
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}:{}", bind_addr.0, bind_addr.1))?
    .run();

    info!("Listening on {}:{}", bind_addr.0, bind_addr.1);

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            // Workers get the shutdown timeout to drain; relays still running after
            // that are dropped and their storage guards remove the staged files
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Console logging through `tracing`.
///
/// `RUST_LOG` controls the filter; without it the relay logs at debug and
/// actix at info.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

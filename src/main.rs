//! # Claims Voice Gateway - Main Application Entry Point
//!
//! Real-time bridge between a telephony media stream and a conversational
//! voice-AI service. Each phone call arrives as one WebSocket connection on
//! `/ws/telephony`; the gateway opens a matching AI connection, transcodes
//! audio both directions, injects caller context, and relays the AI's tool
//! calls to the backend services.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared gateway state and metrics counters
//! - **websocket**: per-call telephony actor, one session per connection
//! - **ai**: protocol types and client for the voice-AI leg
//! - **audio**: μ-law/WAV transcoding and the outbound playback sequencer
//! - **session**: the per-call lifecycle state machine
//! - **context**: caller-context decoding and AI priming
//! - **tools**: dispatch bridge for AI-issued function invocations
//! - **health / middleware**: operational endpoints and request telemetry

mod ai;          // Voice-AI leg (ai/ directory)
mod audio;       // Transcoding and sequencing (audio/ directory)
mod config;      // Configuration management (config.rs)
mod context;     // Caller context injection (context.rs)
mod error;       // Error handling types (error.rs)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Request telemetry (middleware/ directory)
mod session;     // Call session state machine (session.rs)
mod state;       // Application state management (state.rs)
mod tools;       // Tool dispatch bridge (tools/ directory)
mod websocket;   // Telephony media stream handler (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting claims-voice-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, AI endpoint {}",
        config.server.host, config.server.port, config.ai.ws_url
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            // Telephony media stream: one connection per active call
            .route("/ws/telephony", web::get().to(websocket::telephony_websocket))
            // Operational endpoints
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging with env-filter control via RUST_LOG.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claims_voice_gateway=info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// SIGTERM/SIGINT set the shutdown flag; in-flight calls get a graceful
/// server stop rather than a hard exit.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

//! v2v-relay - real-time video-to-video session relay
//!
//! Main entry point for the relay server.

use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use v2v_relay::{
    inference_engine::{EchoEngine, EngineHandle},
    models::InputMode,
    state::{AppConfig, AppState},
    web_api,
};

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "v2v_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting v2v-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        max_queue_size = config.max_queue_size,
        session_timeout_sec = config.session_timeout_sec,
        ingest_fps = config.ingest_fps,
        output_fps = %format!("{}-{}", config.output_min_fps, config.output_max_fps),
        metrics_enabled = config.enable_metrics,
        metrics_dir = %config.metrics_dir.display(),
        "Configuration loaded"
    );

    // No GPU engine linked into this binary: loop frames back
    let engine = EngineHandle::new(EchoEngine::new(InputMode::Image));

    let root = CancellationToken::new();
    let state = AppState::new(config, engine, root);
    state.lifecycle.start()?;
    tracing::info!("DrainWorker started");

    let mut app = web_api::create_router(state.clone());
    if let Some(static_dir) = &state.config.static_dir {
        let serve_dir = ServeDir::new(static_dir)
            .not_found_service(ServeFile::new(static_dir.join("index.html")));
        app = app.fallback_service(serve_dir);
        tracing::info!(static_dir = %static_dir.display(), "Static file serving enabled");
    }
    let app = app
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Open media streams and sockets only end once their sessions are torn down
    let lifecycle = state.lifecycle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            lifecycle.shutdown().await;
        })
        .await?;

    state.lifecycle.shutdown().await;
    Ok(())
}

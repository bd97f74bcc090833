//! ibx-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects the pool,
//! builds the provider/LLM clients, spawns every worker role under the
//! supervisor, and serves the HTTP status surface.  Route handlers live in
//! `routes.rs`; shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use ibx_daemon::{routes, state};
use ibx_extraction::{ExtractionEnqueuer, ExtractionWorker};
use ibx_llm::{HttpLlmClient, LlmClient};
use ibx_provider::{EmailProvider, HttpEmailProvider};
use ibx_runtime::{spawn_signal_listener, Supervisor};
use ibx_sync::{BackfillOrchestrator, CompletionMonitor, ThreadSyncWorker, WebhookConsumer};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = load_config().await?;
    let settings = config.settings();
    if !config.config_hash.is_empty() {
        info!(config_hash = %config.config_hash, "configuration loaded");
    }

    let pool = ibx_db::connect_from_env().await?;
    ibx_db::migrate(&pool).await?;

    let provider: Arc<dyn EmailProvider> = Arc::new(
        HttpEmailProvider::from_env()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("provider client init failed")?,
    );
    let llm: Arc<dyn LlmClient> = Arc::new(
        HttpLlmClient::from_env()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("llm client init failed")?,
    );

    // Worker roles. Orchestrator, webhook consumer, enqueuer and monitor are
    // singletons; thread-sync and extraction scale by configuration.
    let mut supervisor = Supervisor::new();
    spawn_signal_listener(supervisor.controller());

    {
        let orchestrator =
            BackfillOrchestrator::new(pool.clone(), Arc::clone(&provider), settings.clone());
        supervisor.spawn("backfill", move |sd| orchestrator.run(sd));
    }
    {
        let consumer = WebhookConsumer::new(pool.clone(), Arc::clone(&provider), settings.clone());
        supervisor.spawn("webhook", move |sd| consumer.run(sd));
    }
    {
        let monitor = CompletionMonitor::new(pool.clone(), settings.clone());
        supervisor.spawn("monitor", move |sd| monitor.run(sd));
    }
    {
        let enqueuer = ExtractionEnqueuer::new(pool.clone(), Arc::clone(&llm), settings.clone());
        supervisor.spawn("extraction-enqueuer", move |sd| enqueuer.run(sd));
    }
    for worker_id in 0..settings.thread_sync_workers {
        let worker = ThreadSyncWorker::new(
            pool.clone(),
            Arc::clone(&provider),
            settings.clone(),
            worker_id,
        );
        supervisor.spawn(&format!("thread-sync-{worker_id}"), move |sd| worker.run(sd));
    }
    for worker_id in 0..settings.extraction_workers {
        let worker =
            ExtractionWorker::new(pool.clone(), Arc::clone(&llm), settings.clone(), worker_id);
        supervisor.spawn(&format!("extraction-{worker_id}"), move |sd| worker.run(sd));
    }

    // HTTP status surface.
    let shared = Arc::new(state::AppState::new(pool.clone()));
    state::spawn_heartbeat(shared.as_ref().clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("ibx-daemon listening on http://{}", addr);

    let mut server_shutdown = supervisor.shutdown_handle();
    let server = axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async move { server_shutdown.triggered().await });

    let serve_result = server.await;
    supervisor.join_all().await;
    serve_result.context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Layered YAML config paths from IBX_CONFIG (comma-separated); empty config
/// (all defaults) when unset.
async fn load_config() -> Result<ibx_config::LoadedConfig> {
    match std::env::var("IBX_CONFIG") {
        Ok(paths) if !paths.is_empty() => {
            let parts: Vec<&str> = paths.split(',').map(str::trim).collect();
            ibx_config::load_layered_yaml(&parts).await
        }
        _ => Ok(ibx_config::LoadedConfig::empty()),
    }
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("IBX_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

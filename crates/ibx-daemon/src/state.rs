//! Shared runtime state for ibx-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    SyncProgress(SyncProgress),
}

/// Progress snapshot for one active configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncProgress {
    pub config_id: uuid::Uuid,
    pub threads_queued: i32,
    pub threads_processing: i32,
    pub threads_completed: i32,
    pub threads_failed: i32,
    pub messages_synced: i32,
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// Postgres pool shared with the worker roles.
    pub pool: PgPool,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        Self {
            bus,
            build: BuildInfo {
                service: "ibx-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            pool,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat plus a progress snapshot
/// per active configuration every `interval`.
pub fn spawn_heartbeat(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = state.bus.send(BusMsg::Heartbeat { ts_millis: ts });

            if let Ok(config_ids) = ibx_db::list_active_config_ids(&state.pool).await {
                for config_id in config_ids {
                    if let Ok(Some(stats)) = ibx_db::fetch_stats(&state.pool, config_id).await {
                        let _ = state.bus.send(BusMsg::SyncProgress(SyncProgress {
                            config_id,
                            threads_queued: stats.threads_queued,
                            threads_processing: stats.threads_processing,
                            threads_completed: stats.threads_completed,
                            threads_failed: stats.threads_failed,
                            messages_synced: stats.messages_synced,
                        }));
                    }
                }
            }
        }
    });
}

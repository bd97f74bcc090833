//! Axum router and all HTTP handlers for ibx-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so route tests can
//! compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    api_types::{HealthResponse, NotFoundResponse, ProgressResponse, StatusResponse},
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/configs/:config_id/progress", get(config_progress))
        .route("/v1/events", get(events))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    let db = match ibx_db::status(&st.pool).await {
        Ok(s) => s,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(StatusResponse {
                    daemon_uptime_secs: uptime_secs(),
                    db_ok: false,
                    has_sync_schema: false,
                    active_syncs: 0,
                }),
            )
                .into_response();
        }
    };

    let active_syncs = ibx_db::count_active_syncs(&st.pool).await.unwrap_or(0);

    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            db_ok: db.ok,
            has_sync_schema: db.has_sync_schema,
            active_syncs,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/configs/{config_id}/progress
// ---------------------------------------------------------------------------

pub(crate) async fn config_progress(
    State(st): State<Arc<AppState>>,
    Path(config_id): Path<Uuid>,
) -> Response {
    let config = match ibx_db::fetch_configuration(&st.pool, config_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(NotFoundResponse {
                    error: format!("unknown configuration {config_id}"),
                }),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NotFoundResponse {
                    error: format!("{e:#}"),
                }),
            )
                .into_response();
        }
    };

    let stats = ibx_db::fetch_stats(&st.pool, config_id).await.ok().flatten();

    let (queued, processing, completed, failed, messages) = stats
        .as_ref()
        .map(|s| {
            (
                s.threads_queued,
                s.threads_processing,
                s.threads_completed,
                s.threads_failed,
                s.messages_synced,
            )
        })
        .unwrap_or((0, 0, 0, 0, 0));

    let progress_ratio = if queued > 0 {
        f64::from(completed + failed) / f64::from(queued)
    } else {
        0.0
    };

    (
        StatusCode::OK,
        Json(ProgressResponse {
            config_id,
            status: config.status.as_str().to_string(),
            threads_queued: queued,
            threads_processing: processing,
            threads_completed: completed,
            threads_failed: failed,
            messages_synced: messages,
            progress_ratio,
            sync_started_at: stats.as_ref().and_then(|s| s.sync_started_at),
            sync_completed_at: stats.as_ref().and_then(|s| s.sync_completed_at),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/events  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn events(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::SyncProgress(_) => "progress",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

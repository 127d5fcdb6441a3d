//! Axum router and all HTTP handlers for rod-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Every handler only talks to the [`SessionHandle`]; the
//! session task stays the single writer.
//!
//! [`SessionHandle`]: rod_session::SessionHandle

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use rod_reconcile::OrderStatus;
use rod_session::SessionError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::info;

use crate::{
    api_types::{
        AckResponse, ErrorResponse, HealthResponse, MutationAccepted, MutationsAccepted,
        StatusChangeRequest,
    },
    state::{uptime_secs, AppState},
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
        .route("/v1/state", get(state_handler))
        .route("/v1/stream", get(stream_handler))
        .route("/v1/orders/:id/status", post(order_status))
        .route("/v1/notifications/read-all", post(read_all))
        .route("/v1/notifications/:id/read", post(read_one))
        .route("/v1/notifications/:id", delete(dismiss))
        .route("/v1/notifications", delete(clear))
        .with_state(state)
}

fn error(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            error: msg.into(),
        }),
    )
        .into_response()
}

fn session_error(e: SessionError) -> Response {
    match e {
        SessionError::Refused(refusal) => {
            error(StatusCode::CONFLICT, "MUTATION_REFUSED", refusal.to_string())
        }
        SessionError::Closed => error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SESSION_CLOSED",
            "session is shut down",
        ),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let view = st.session.state();
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
            epoch: view.epoch,
            stale: view.stale,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/state
// ---------------------------------------------------------------------------

pub(crate) async fn state_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let view = st.session.state();
    (StatusCode::OK, Json(view.as_ref().clone()))
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/status
// ---------------------------------------------------------------------------

pub(crate) async fn order_status(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(body): Json<StatusChangeRequest>,
) -> Response {
    let status = match OrderStatus::parse(&body.status) {
        Ok(s) => s,
        Err(e) => return error(StatusCode::BAD_REQUEST, "INVALID_STATUS", e.to_string()),
    };
    match st.session.request_order_status(&order_id, status).await {
        Ok(mutation) => {
            info!(%order_id, %status, mutation_id = mutation.id, "orders/status");
            (StatusCode::ACCEPTED, Json(MutationAccepted { mutation })).into_response()
        }
        Err(e) => session_error(e),
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub(crate) async fn read_one(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match st.session.mark_notification_read(&id).await {
        Ok(mutation) => (StatusCode::ACCEPTED, Json(MutationAccepted { mutation })).into_response(),
        Err(e) => session_error(e),
    }
}

pub(crate) async fn read_all(State(st): State<Arc<AppState>>) -> Response {
    match st.session.mark_all_notifications_read().await {
        Ok(mutations) => {
            info!(count = mutations.len(), "notifications/read-all");
            (StatusCode::ACCEPTED, Json(MutationsAccepted { mutations })).into_response()
        }
        Err(e) => session_error(e),
    }
}

pub(crate) async fn dismiss(State(st): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match st.session.dismiss_notification(&id).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(AckResponse { ok: true })).into_response(),
        Err(e) => session_error(e),
    }
}

pub(crate) async fn clear(State(st): State<Arc<AppState>>) -> Response {
    match st.session.clear_notifications().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(AckResponse { ok: true })).into_response(),
        Err(e) => session_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

/// `state` events carry the full reconciled state (the current one first),
/// `notice` events carry [`rod_session::Notice`].
pub(crate) async fn stream_handler(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = session_events(&st);
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn session_events(st: &AppState) -> impl Stream<Item = Result<Event, Infallible>> {
    let states = WatchStream::new(st.session.subscribe()).filter_map(|s| async move {
        serde_json::to_string(s.as_ref())
            .ok()
            .map(|data| Ok::<_, Infallible>(Event::default().event("state").data(data)))
    });
    let notices = BroadcastStream::new(st.session.notices()).filter_map(|msg| async move {
        match msg {
            Ok(n) => serde_json::to_string(&n)
                .ok()
                .map(|data| Ok::<_, Infallible>(Event::default().event("notice").data(data))),
            Err(_) => None, // lagged
        }
    });
    stream::select(states, notices)
}

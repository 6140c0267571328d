use crate::agent::AgentLogBroker;
use crate::session::{Registry, StreamOptions};
use crate::ws;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state, constructed once in `main` and handed to every
/// handler through axum's `State` extractor — the explicit, process-scoped
/// registry the re-architecture notes call for instead of module-scope
/// globals.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub agent_logs: Arc<AgentLogBroker>,
    pub default_stream_options: StreamOptions,
    pub screenshot_interval_secs: u64,
}

/// Assembles the full router: the core video-streaming WS surface (in
/// scope), the Socket.IO namespace, and thin stub routes for the HTTP
/// CRUD/control surface that spec.md places out of scope as an external
/// collaborator.
pub fn build_router(state: Arc<AppState>) -> Router {
    let (socketio_layer, _io) = ws::build_socketio_layer(state.clone());

    Router::new()
        .route("/ws/h264/:id", get(ws::handle_h264))
        .route("/ws/screen/:id", get(ws::handle_screen))
        .route("/ws/ai-logs/:id", get(ws::handle_ai_logs))
        .merge(stub_routes())
        .layer(socketio_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Out-of-scope HTTP surface (§1): device scan/connect/disconnect and
/// per-action control commands live in a separate external collaborator.
/// These routes exist only so the router documents the boundary and a
/// client hitting them gets a clear "not handled here" response instead of
/// a generic 404.
fn stub_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices", get(not_implemented))
        .route("/devices/scan", post(not_implemented))
        .route("/devices/:id/connect", post(not_implemented))
        .route("/devices/:id/disconnect", post(not_implemented))
        .route("/control/:id/:action", post(not_implemented))
}

async fn not_implemented() -> (StatusCode, &'static str) {
    (
        StatusCode::NOT_IMPLEMENTED,
        "handled by a separate external collaborator, not this gateway",
    )
}

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::sessions::{
    disconnect_session, get_qr, get_status, list_sessions, reconnect_session, request_pairing,
    restore_session, send_message,
};

/// Session management routes, nested under /api/v1 by the app builder.
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{tenant_id}/status", get(get_status))
        .route("/sessions/{tenant_id}/qr", get(get_qr))
        .route("/sessions/{tenant_id}/pairing", post(request_pairing))
        .route("/sessions/{tenant_id}/messages", post(send_message))
        .route("/sessions/{tenant_id}/disconnect", post(disconnect_session))
        .route("/sessions/{tenant_id}/reconnect", post(reconnect_session))
        .route("/sessions/{tenant_id}/restore", post(restore_session))
}

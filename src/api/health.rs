use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_count: usize,
    pub total_count: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.registry.counts();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_count: counts.active_count,
        total_count: counts.total_count,
    })
}

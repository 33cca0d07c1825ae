//! Session lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::session::{ArtifactOutcome, SessionSummary, StatusSnapshot};
use crate::transport::SendReceipt;

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() || tenant_id.len() > 128 {
        return Err(AppError::Validation(
            "tenant id must be between 1 and 128 characters".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Status & Listing
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

/// GET /api/v1/sessions - List all registered sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state.registry.list();
    let total = sessions.len();
    Json(SessionListResponse { sessions, total })
}

/// GET /api/v1/sessions/{tenant_id}/status - Session status snapshot
pub async fn get_status(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<StatusSnapshot>> {
    validate_tenant_id(&tenant_id)?;
    let session = state.registry.get_or_create(&tenant_id);
    Ok(Json(session.status()))
}

// ============================================================================
// QR / Pairing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QrResponse {
    Ready {
        payload: String,
        issued_at: DateTime<Utc>,
    },
    Pending,
    Connected,
}

/// GET /api/v1/sessions/{tenant_id}/qr - Current QR artifact, waiting up to
/// the configured bound for one to be issued
pub async fn get_qr(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<QrQuery>,
) -> Result<(StatusCode, Json<QrResponse>)> {
    validate_tenant_id(&tenant_id)?;
    let session = state.registry.get_or_create(&tenant_id);

    let response = match session.request_qr(query.force_new).await? {
        ArtifactOutcome::Ready(qr) => (
            StatusCode::OK,
            Json(QrResponse::Ready {
                payload: qr.payload,
                issued_at: qr.issued_at,
            }),
        ),
        ArtifactOutcome::Pending => (StatusCode::ACCEPTED, Json(QrResponse::Pending)),
        ArtifactOutcome::AlreadyConnected => (StatusCode::OK, Json(QrResponse::Connected)),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct PairingRequest {
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairingResponse {
    Ready {
        code: String,
        phone_number: String,
        issued_at: DateTime<Utc>,
    },
    Pending,
    Connected,
}

/// POST /api/v1/sessions/{tenant_id}/pairing - Register via pairing code
pub async fn request_pairing(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<PairingRequest>,
) -> Result<(StatusCode, Json<PairingResponse>)> {
    validate_tenant_id(&tenant_id)?;
    if request.phone_number.trim().is_empty() {
        return Err(AppError::Validation(
            "phone_number must not be empty".to_string(),
        ));
    }

    let session = state.registry.get_or_create(&tenant_id);
    let response = match session.request_pairing(request.phone_number).await? {
        ArtifactOutcome::Ready(artifact) => (
            StatusCode::OK,
            Json(PairingResponse::Ready {
                code: artifact.code,
                phone_number: artifact.phone_number,
                issued_at: artifact.issued_at,
            }),
        ),
        ArtifactOutcome::Pending => (StatusCode::ACCEPTED, Json(PairingResponse::Pending)),
        ArtifactOutcome::AlreadyConnected => (StatusCode::OK, Json(PairingResponse::Connected)),
    };
    Ok(response)
}

// ============================================================================
// Messaging
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub destination: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub receipt: SendReceipt,
}

/// POST /api/v1/sessions/{tenant_id}/messages - Best-effort send; fails when
/// no open connection exists
pub async fn send_message(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<SendResponse>> {
    validate_tenant_id(&tenant_id)?;
    if request.destination.trim().is_empty() {
        return Err(AppError::Validation(
            "destination must not be empty".to_string(),
        ));
    }

    let session = state
        .registry
        .get(&tenant_id)
        .ok_or_else(|| AppError::SessionNotFound(tenant_id.clone()))?;

    let receipt = session.send(&request.destination, &request.message).await?;
    Ok(Json(SendResponse { receipt }))
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DisconnectQuery {
    #[serde(default)]
    pub wipe_credentials: bool,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub disconnected: bool,
    pub wiped: bool,
}

/// POST /api/v1/sessions/{tenant_id}/disconnect - Tear down the connection;
/// idempotent for unknown tenants
pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<DisconnectQuery>,
) -> Result<Json<DisconnectResponse>> {
    validate_tenant_id(&tenant_id)?;

    let Some(session) = state.registry.get(&tenant_id) else {
        // Nothing to do for an absent tenant
        return Ok(Json(DisconnectResponse {
            disconnected: false,
            wiped: false,
        }));
    };

    session.disconnect(query.wipe_credentials).await?;
    Ok(Json(DisconnectResponse {
        disconnected: true,
        wiped: query.wipe_credentials,
    }))
}

/// POST /api/v1/sessions/{tenant_id}/reconnect - Force a fresh credential
/// cycle (wipes the persisted bundle)
pub async fn reconnect_session(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<StatusSnapshot>> {
    validate_tenant_id(&tenant_id)?;
    let session = state.registry.get_or_create(&tenant_id);
    session.start(true).await?;
    Ok(Json(session.status()))
}

/// POST /api/v1/sessions/{tenant_id}/restore - Reconnect with the persisted
/// credential bundle
pub async fn restore_session(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<StatusSnapshot>> {
    validate_tenant_id(&tenant_id)?;
    let session = state.registry.get_or_create(&tenant_id);
    session.start(false).await?;
    Ok(Json(session.status()))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Admission timed out after {0} seconds")]
    AdmissionTimeout(u64),

    #[error("Transport create failed: {0}")]
    TransportCreateFailed(String),

    #[error("No open connection for tenant {0}")]
    NotConnected(String),

    #[error("Connection lost while sending: {0}")]
    ConnectionLost(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = match &self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                let client_msg = if is_production() {
                    "Configuration error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", client_msg, log_msg)
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::SessionNotFound(tenant) => (
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                format!("No session registered for tenant '{}'", tenant),
                tenant.clone(),
            ),
            AppError::AdmissionTimeout(_) => {
                let msg = self.to_string();
                (StatusCode::SERVICE_UNAVAILABLE, "ADMISSION_TIMEOUT", msg.clone(), msg)
            }
            AppError::TransportCreateFailed(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Connection setup failed".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::BAD_GATEWAY, "TRANSPORT_CREATE_FAILED", client_msg, log_msg)
            }
            AppError::NotConnected(_) => {
                let msg = self.to_string();
                (StatusCode::CONFLICT, "NOT_CONNECTED", msg.clone(), msg)
            }
            AppError::ConnectionLost(e) => {
                (StatusCode::BAD_GATEWAY, "CONNECTION_LOST", self.to_string(), e.clone())
            }
            AppError::Storage(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Credential storage error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", client_msg, log_msg)
            }
            AppError::Internal(e) => {
                let log_msg = e.clone();
                let client_msg = if is_production() {
                    "Internal server error".to_string()
                } else {
                    log_msg.clone()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", client_msg, log_msg)
            }
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

//! Boundary to the remote messaging network's protocol library.
//!
//! The gateway never speaks the wire protocol itself: it hands persisted
//! credentials to a [`Transport`], receives a live [`TransportHandle`] plus a
//! stream of lifecycle events, and reacts to those events in the session
//! state machine. Production deployments plug the real protocol adapter in
//! behind these traits; the built-in `memory` backend simulates the network
//! in-process for development and tests.

mod factory;
mod memory;

pub use factory::create_transport;
pub use memory::MemoryTransport;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::storage::Credentials;

/// Raw close codes as reported by the remote network. Opaque to everything
/// except the classification table in `session::close_reason`.
pub mod close_code {
    pub const LOGGED_OUT: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const CHALLENGE_TIMED_OUT: u16 = 408;
    pub const DEVICE_MISMATCH: u16 = 411;
    pub const STREAM_ERROR: u16 = 428;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const BAD_SESSION: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const RESTART_REQUIRED: u16 = 515;
}

/// Lifecycle signals delivered on a per-connection event stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The network challenged this unregistered device with a QR payload.
    QrChallenge { payload: String },
    /// The network accepted the attached phone number; a pairing code may
    /// now be requested through the handle.
    PairingReady,
    /// The connection is fully established. Carries the (possibly refreshed)
    /// credential bundle to persist.
    Open { credentials: Credentials },
    /// The network rotated credentials mid-session; persist immediately.
    CredentialsRotated { credentials: Credentials },
    /// The connection ended. `code` is a raw remote status, absent for
    /// purely local failures.
    Closed { code: Option<u16>, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// When present, request pairing-code registration instead of QR.
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub message_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to create connection: {0}")]
    CreateFailed(String),

    #[error("connection is not open")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("pairing unavailable: {0}")]
    PairingUnavailable(String),
}

/// One live connection to the remote network.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send(&self, destination: &str, payload: &str) -> Result<SendReceipt, TransportError>;

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, TransportError>;

    /// Lightweight liveness probe. The remote's own close event is not
    /// always delivered for silently dead sockets.
    async fn probe(&self) -> Result<(), TransportError>;

    async fn close(&self);
}

/// A freshly created connection: the handle plus its event stream.
pub struct TransportConnection {
    pub handle: Arc<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin establishing a connection for one tenant. Returns quickly; the
    /// handshake outcome arrives on the event stream.
    async fn create(
        &self,
        tenant_id: &str,
        credentials: Option<Credentials>,
        options: ConnectOptions,
    ) -> Result<TransportConnection, TransportError>;
}

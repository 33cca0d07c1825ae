//! In-process simulated network backend.
//!
//! Mirrors the observable behavior of the real protocol adapter: credentialed
//! connects open shortly after creation, unregistered tenants receive rotating
//! QR challenges, and attaching a phone number yields a pairing code. Tests
//! drive the interesting paths explicitly (`complete_scan`, `inject_close`,
//! `set_probe_failing`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::storage::Credentials;

use super::{
    ConnectOptions, SendReceipt, Transport, TransportConnection, TransportError, TransportEvent,
    TransportHandle,
};

const EVENT_BUFFER_SIZE: usize = 16;
const CONNECT_DELAY_MS: u64 = 20;
const QR_REFRESH_MS: u64 = 20_000;

/// Shared state between a handle, its driver task, and the transport's
/// per-tenant control entry.
struct ConnState {
    tenant_id: String,
    open: AtomicBool,
    closed: AtomicBool,
    probe_failing: AtomicBool,
    events: mpsc::Sender<TransportEvent>,
}

impl ConnState {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

pub struct MemoryTransport {
    /// tenant_id -> state of the most recently created connection
    connections: DashMap<String, Arc<ConnState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Simulate the end user scanning the current QR (or confirming the
    /// pairing code): the connection opens with a fresh credential bundle.
    pub async fn complete_scan(&self, tenant_id: &str) -> bool {
        let Some(state) = self.connections.get(tenant_id).map(|s| s.clone()) else {
            return false;
        };
        if !state.is_live() {
            return false;
        }
        state.open.store(true, Ordering::Release);
        let credentials = Credentials::new(random_token(32));
        state
            .events
            .send(TransportEvent::Open { credentials })
            .await
            .is_ok()
    }

    /// Simulate a remote-initiated close with a raw status code.
    pub async fn inject_close(&self, tenant_id: &str, code: Option<u16>, message: &str) -> bool {
        let Some(state) = self.connections.get(tenant_id).map(|s| s.clone()) else {
            return false;
        };
        if !state.is_live() {
            return false;
        }
        state.open.store(false, Ordering::Release);
        state.closed.store(true, Ordering::Release);
        state
            .events
            .send(TransportEvent::Closed {
                code,
                message: message.to_string(),
            })
            .await
            .is_ok()
    }

    /// Make subsequent probes fail without delivering a close event,
    /// simulating a silently dead socket.
    pub fn set_probe_failing(&self, tenant_id: &str, failing: bool) {
        if let Some(state) = self.connections.get(tenant_id) {
            state.probe_failing.store(failing, Ordering::Release);
        }
    }

    /// Whether the most recent connection for this tenant is open.
    pub fn is_open(&self, tenant_id: &str) -> bool {
        self.connections
            .get(tenant_id)
            .map(|s| s.open.load(Ordering::Acquire) && s.is_live())
            .unwrap_or(false)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create(
        &self,
        tenant_id: &str,
        credentials: Option<Credentials>,
        options: ConnectOptions,
    ) -> Result<TransportConnection, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);

        let state = Arc::new(ConnState {
            tenant_id: tenant_id.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            probe_failing: AtomicBool::new(false),
            events: tx,
        });
        self.connections
            .insert(tenant_id.to_string(), state.clone());

        tokio::spawn(drive_connection(state.clone(), credentials, options));

        Ok(TransportConnection {
            handle: Arc::new(MemoryHandle { state }),
            events: rx,
        })
    }
}

/// Emits the lifecycle events the real network would produce for this
/// combination of credentials and options.
async fn drive_connection(
    state: Arc<ConnState>,
    credentials: Option<Credentials>,
    options: ConnectOptions,
) {
    tokio::time::sleep(Duration::from_millis(CONNECT_DELAY_MS)).await;
    if !state.is_live() {
        return;
    }

    match (credentials, &options.phone_number) {
        (Some(credentials), _) => {
            // Registered device: the handshake succeeds immediately.
            state.open.store(true, Ordering::Release);
            let _ = state.events.send(TransportEvent::Open { credentials }).await;
        }
        (None, Some(_)) => {
            let _ = state.events.send(TransportEvent::PairingReady).await;
        }
        (None, None) => {
            // Unregistered device: rotate QR challenges until scanned,
            // closed, or the session tears the connection down.
            loop {
                if !state.is_live() || state.open.load(Ordering::Acquire) {
                    return;
                }
                let sent = state
                    .events
                    .send(TransportEvent::QrChallenge {
                        payload: random_token(48),
                    })
                    .await;
                if sent.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(QR_REFRESH_MS)).await;
            }
        }
    }
}

struct MemoryHandle {
    state: Arc<ConnState>,
}

#[async_trait]
impl TransportHandle for MemoryHandle {
    async fn send(&self, destination: &str, _payload: &str) -> Result<SendReceipt, TransportError> {
        if !self.state.is_live() {
            return Err(TransportError::ConnectionLost(
                "connection already closed".to_string(),
            ));
        }
        if !self.state.open.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        if self.state.probe_failing.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionLost(format!(
                "send to {} failed: socket unresponsive",
                destination
            )));
        }
        Ok(SendReceipt {
            message_id: Uuid::new_v4(),
            accepted_at: Utc::now(),
        })
    }

    async fn request_pairing_code(&self, _phone_number: &str) -> Result<String, TransportError> {
        if !self.state.is_live() {
            return Err(TransportError::PairingUnavailable(
                "connection already closed".to_string(),
            ));
        }
        Ok(random_pairing_code())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if !self.state.is_live() || !self.state.open.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        if self.state.probe_failing.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionLost(
                "probe timed out".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.open.store(false, Ordering::Release);
        self.state.closed.store(true, Ordering::Release);
        tracing::debug!(tenant_id = %self.state.tenant_id, "Simulated connection closed by client");
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// 8-character grouped code, e.g. "A1B2-C3D4".
fn random_pairing_code() -> String {
    let raw: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("{}-{}", &raw[..4], &raw[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_credentialed_connect_opens() {
        let transport = MemoryTransport::new();
        let creds = Credentials::new("tok".to_string());

        let mut conn = transport
            .create("u1", Some(creds), ConnectOptions::default())
            .await
            .unwrap();

        match conn.events.recv().await {
            Some(TransportEvent::Open { .. }) => {}
            other => panic!("expected Open, got {:?}", other),
        }
        assert!(transport.is_open("u1"));
        assert!(conn.handle.send("+15550000", "hi").await.is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_connect_yields_qr_then_scan_opens() {
        let transport = MemoryTransport::new();

        let mut conn = transport
            .create("u1", None, ConnectOptions::default())
            .await
            .unwrap();

        match conn.events.recv().await {
            Some(TransportEvent::QrChallenge { payload }) => assert!(!payload.is_empty()),
            other => panic!("expected QrChallenge, got {:?}", other),
        }

        assert!(transport.complete_scan("u1").await);
        match conn.events.recv().await {
            Some(TransportEvent::Open { .. }) => {}
            other => panic!("expected Open, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_phone_number_yields_pairing_ready() {
        let transport = MemoryTransport::new();

        let mut conn = transport
            .create(
                "u1",
                None,
                ConnectOptions {
                    phone_number: Some("+15551234".to_string()),
                },
            )
            .await
            .unwrap();

        match conn.events.recv().await {
            Some(TransportEvent::PairingReady) => {}
            other => panic!("expected PairingReady, got {:?}", other),
        }

        let code = conn.handle.request_pairing_code("+15551234").await.unwrap();
        assert_eq!(code.len(), 9);
        assert!(code.contains('-'));
    }

    #[tokio::test]
    async fn test_injected_close_delivers_code() {
        let transport = MemoryTransport::new();
        let creds = Credentials::new("tok".to_string());

        let mut conn = transport
            .create("u1", Some(creds), ConnectOptions::default())
            .await
            .unwrap();
        let _ = conn.events.recv().await; // Open

        assert!(
            transport
                .inject_close("u1", Some(super::super::close_code::CONNECTION_REPLACED), "replaced")
                .await
        );
        match conn.events.recv().await {
            Some(TransportEvent::Closed { code, .. }) => {
                assert_eq!(code, Some(super::super::close_code::CONNECTION_REPLACED));
            }
            other => panic!("expected Closed, got {:?}", other),
        }
        assert!(conn.handle.send("+15550000", "hi").await.is_err());
    }
}

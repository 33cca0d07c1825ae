use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::CloseReasonKind;

/// Lifecycle state of one tenant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingQr,
    AwaitingPairing,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    /// States in which a transport handle may exist.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::AwaitingQr
                | SessionState::AwaitingPairing
                | SessionState::Open
        )
    }
}

/// Time-limited QR bootstrap token presented to the end user.
#[derive(Debug, Clone, Serialize)]
pub struct QrArtifact {
    pub payload: String,
    pub issued_at: DateTime<Utc>,
}

impl QrArtifact {
    pub fn new(payload: String) -> Self {
        Self {
            payload,
            issued_at: Utc::now(),
        }
    }

    /// TTL expiry is independent of connection state: a stale QR is never
    /// served as current.
    pub fn is_expired(&self, ttl_secs: u64) -> bool {
        Utc::now().signed_duration_since(self.issued_at) >= Duration::seconds(ttl_secs as i64)
    }
}

/// Pairing-code bootstrap token. Mutually exclusive in time with
/// [`QrArtifact`] for a given connection attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PairingArtifact {
    pub phone_number: String,
    pub code: String,
    pub issued_at: DateTime<Utc>,
}

impl PairingArtifact {
    pub fn new(phone_number: String, code: String) -> Self {
        Self {
            phone_number,
            code,
            issued_at: Utc::now(),
        }
    }
}

/// Point-in-time view of a session, safe to serialize to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub tenant_id: String,
    pub state: SessionState,
    pub connected: bool,
    pub qr_present: bool,
    pub pairing_present: bool,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close_reason: Option<CloseReasonKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Outcome of a bounded wait for a QR or pairing artifact.
#[derive(Debug, Clone)]
pub enum ArtifactOutcome<T> {
    /// Artifact is cached and unexpired.
    Ready(T),
    /// Not ready within the bounded wait; the caller should retry later.
    Pending,
    /// The session is already open; no artifact will be issued.
    AlreadyConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::AwaitingQr.is_active());
        assert!(SessionState::AwaitingPairing.is_active());
        assert!(SessionState::Open.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Closed.is_active());
        assert!(!SessionState::Errored.is_active());
    }

    #[test]
    fn test_qr_expiry() {
        let mut qr = QrArtifact::new("payload".to_string());
        assert!(!qr.is_expired(60));

        qr.issued_at = Utc::now() - Duration::seconds(61);
        assert!(qr.is_expired(60));
        // A zero TTL expires immediately
        assert!(QrArtifact::new("p".to_string()).is_expired(0));
    }
}

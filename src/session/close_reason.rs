//! Classification of remote close reasons.
//!
//! The transport reports opaque status codes; everything downstream works
//! with the closed set of buckets below. Adding a new remote code is a
//! one-line addition to the match in [`CloseReasonKind::classify`].

use std::time::Duration;

use serde::Serialize;

use crate::config::ReconnectConfig;
use crate::transport::close_code;

use super::backoff::BackoffSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReasonKind {
    /// Sign-out, bad session, or device mismatch. Terminal: credentials are
    /// wiped and nothing restarts automatically.
    SignedOut,
    /// Unauthorized. Credentials are wiped and a fresh credential cycle
    /// starts after a short delay.
    AuthFailure,
    /// Transient protocol/stream error; gentle retry preserving credentials.
    Transient,
    /// QR/pairing challenge timed out; gentle retry preserving the
    /// session's place.
    ChallengeTimeout,
    /// Server is shedding load; back off longer.
    ServerTerminated,
    /// Duplicate connection elsewhere; back off hardest.
    Conflict,
    /// Anything else where reconnection is generally advisable.
    Retryable,
}

impl CloseReasonKind {
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(close_code::LOGGED_OUT)
            | Some(close_code::BAD_SESSION)
            | Some(close_code::DEVICE_MISMATCH) => CloseReasonKind::SignedOut,
            Some(close_code::FORBIDDEN) => CloseReasonKind::AuthFailure,
            Some(close_code::STREAM_ERROR) | Some(close_code::RESTART_REQUIRED) => {
                CloseReasonKind::Transient
            }
            Some(close_code::CHALLENGE_TIMED_OUT) => CloseReasonKind::ChallengeTimeout,
            Some(close_code::SERVICE_UNAVAILABLE) => CloseReasonKind::ServerTerminated,
            Some(close_code::CONNECTION_REPLACED) => CloseReasonKind::Conflict,
            _ => CloseReasonKind::Retryable,
        }
    }

    /// Whether this close invalidates the persisted credential bundle.
    pub fn wipes_credentials(&self) -> bool {
        matches!(self, CloseReasonKind::SignedOut | CloseReasonKind::AuthFailure)
    }

    /// Metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReasonKind::SignedOut => "signed_out",
            CloseReasonKind::AuthFailure => "auth_failure",
            CloseReasonKind::Transient => "transient",
            CloseReasonKind::ChallengeTimeout => "challenge_timeout",
            CloseReasonKind::ServerTerminated => "server_terminated",
            CloseReasonKind::Conflict => "conflict",
            CloseReasonKind::Retryable => "retryable",
        }
    }
}

/// What the session does next after a classified close.
#[derive(Debug)]
pub enum RetryAction {
    /// Wipe credentials and destroy the session.
    Drop,
    /// Wipe credentials, then restart with `force_new` after the delay.
    FreshStart(Duration),
    /// Restart preserving credentials after the delay.
    Restart(Duration),
}

impl CloseReasonKind {
    pub fn retry_action(&self, config: &ReconnectConfig, attempt: u32) -> RetryAction {
        match self {
            CloseReasonKind::SignedOut => RetryAction::Drop,
            CloseReasonKind::AuthFailure => {
                RetryAction::FreshStart(Duration::from_millis(config.retry_delay_ms))
            }
            CloseReasonKind::Transient | CloseReasonKind::ChallengeTimeout => {
                RetryAction::Restart(Duration::from_millis(config.retry_delay_ms))
            }
            CloseReasonKind::ServerTerminated => {
                RetryAction::Restart(Duration::from_millis(config.server_close_delay_ms))
            }
            CloseReasonKind::Conflict => {
                RetryAction::Restart(Duration::from_millis(config.conflict_delay_ms))
            }
            CloseReasonKind::Retryable => {
                RetryAction::Restart(BackoffSchedule::from_config(config).delay_for_attempt(attempt))
            }
        }
    }
}

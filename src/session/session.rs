//! Per-tenant session state machine.
//!
//! Each session drives connection establishment, QR/pairing credential
//! bootstrap, failure-classified reconnection, and liveness bookkeeping for
//! exactly one tenant. Lifecycle operations (start, disconnect, pairing) are
//! serialized through an async op-lock; the mutable state itself lives behind
//! a short-critical-section mutex that is never held across an await.
//!
//! Every connection attempt carries a generation number. Events, probes, and
//! close handling all validate the generation first, so signals from a
//! torn-down attempt can never mutate a newer one.

use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;

use crate::config::{ReconnectConfig, SessionConfig};
use crate::error::AppError;
use crate::gate::{AdmissionGate, AdmissionPermit};
use crate::metrics;
use crate::storage::{CredentialStore, Credentials};
use crate::transport::{
    ConnectOptions, SendReceipt, Transport, TransportError, TransportEvent, TransportHandle,
};

use super::backoff::BackoffSchedule;
use super::close_reason::{CloseReasonKind, RetryAction};
use super::registry::SessionRegistry;
use super::types::{ArtifactOutcome, PairingArtifact, QrArtifact, SessionState, StatusSnapshot};

/// Shared collaborators handed to every session by the registry.
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn CredentialStore>,
    pub gate: Arc<AdmissionGate>,
    pub session_config: SessionConfig,
    pub reconnect_config: ReconnectConfig,
}

/// Result of one liveness probe, consumed by the liveness task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Session was not open; nothing to probe.
    Skipped,
    Healthy,
    /// Probe failed but the failure threshold has not been reached.
    Failing(u32),
    /// Threshold reached; the session was forced to `Closed` and the normal
    /// reconnection path has taken over.
    ForcedClose,
}

struct SessionCore {
    state: SessionState,
    /// Bumped on every teardown and every new attempt; stale generations
    /// are discarded everywhere.
    generation: u64,
    handle: Option<Arc<dyn TransportHandle>>,
    /// Held exactly while `state == Connecting`.
    permit: Option<AdmissionPermit>,
    qr: Option<QrArtifact>,
    pairing: Option<PairingArtifact>,
    /// Attached on the next start; cleared once a connection opens or a QR
    /// flow is explicitly requested.
    phone_number: Option<String>,
    attempt_count: u32,
    pending_retry: Option<JoinHandle<()>>,
    last_close: Option<CloseReasonKind>,
    heartbeat_failures: u32,
    last_error: Option<String>,
    event_pump: Option<JoinHandle<()>>,
}

impl SessionCore {
    fn pending_retry_alive(&self) -> bool {
        self.pending_retry
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

struct TeardownParts {
    handle: Option<Arc<dyn TransportHandle>>,
    pump: Option<JoinHandle<()>>,
}

pub struct Session {
    tenant_id: String,
    deps: Arc<SessionDeps>,
    registry: Weak<SessionRegistry>,
    /// Serializes lifecycle operations so a close-driven reconnect and an
    /// explicit start can never race into two live transport handles.
    op_lock: AsyncMutex<()>,
    core: StdMutex<SessionCore>,
    /// Woken whenever an artifact is cached or the session opens.
    artifact_notify: Notify,
}

impl Session {
    pub(crate) fn new(
        tenant_id: String,
        deps: Arc<SessionDeps>,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        Self {
            tenant_id,
            deps,
            registry,
            op_lock: AsyncMutex::new(()),
            core: StdMutex::new(SessionCore {
                state: SessionState::Idle,
                generation: 0,
                handle: None,
                permit: None,
                qr: None,
                pairing: None,
                phone_number: None,
                attempt_count: 0,
                pending_retry: None,
                last_close: None,
                heartbeat_failures: 0,
                last_error: None,
                event_pump: None,
            }),
            artifact_notify: Notify::new(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().unwrap().state
    }

    pub fn has_pending_retry(&self) -> bool {
        self.core.lock().unwrap().pending_retry_alive()
    }

    pub fn status(&self) -> StatusSnapshot {
        let core = self.core.lock().unwrap();
        let ttl = self.deps.session_config.qr_ttl_secs;
        StatusSnapshot {
            tenant_id: self.tenant_id.clone(),
            state: core.state,
            connected: core.state == SessionState::Open,
            qr_present: core.qr.as_ref().map(|q| !q.is_expired(ttl)).unwrap_or(false),
            pairing_present: core.pairing.is_some(),
            reconnect_attempts: core.attempt_count,
            last_close_reason: core.last_close,
            last_error: core.last_error.clone(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().unwrap().generation == generation
    }

    // ------------------------------------------------------------------
    // Lifecycle operations (serialized by the op-lock)
    // ------------------------------------------------------------------

    /// Start (or restart) the connection. `force_new` wipes persisted
    /// credentials first, forcing a fresh registration cycle.
    pub async fn start(self: &Arc<Self>, force_new: bool) -> Result<(), AppError> {
        let _op = self.op_lock.lock().await;
        self.start_locked(force_new).await
    }

    async fn start_locked(self: &Arc<Self>, force_new: bool) -> Result<(), AppError> {
        // Cancel any scheduled retry and tear down a stale attempt before
        // anything else: at most one transport handle per session.
        let parts = self.begin_teardown();
        Self::finish_teardown(parts).await;

        if force_new {
            self.deps
                .store
                .wipe(&self.tenant_id)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
            let mut core = self.core.lock().unwrap();
            core.qr = None;
            core.pairing = None;
            core.attempt_count = 0;
        }

        // Admission: the permit is held exactly while Connecting, bounding
        // simultaneous handshake load across tenants.
        let permit = match self.deps.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                let mut core = self.core.lock().unwrap();
                core.state = SessionState::Closed;
                core.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let credentials = self
            .deps
            .store
            .load(&self.tenant_id)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        let phone_number = self.core.lock().unwrap().phone_number.clone();

        let generation = {
            let mut core = self.core.lock().unwrap();
            core.generation += 1;
            core.state = SessionState::Connecting;
            core.permit = Some(permit);
            core.generation
        };

        tracing::info!(
            tenant_id = %self.tenant_id,
            force_new = force_new,
            has_credentials = credentials.is_some(),
            "Starting connection attempt"
        );

        let options = ConnectOptions { phone_number };
        match self
            .deps
            .transport
            .create(&self.tenant_id, credentials, options)
            .await
        {
            Ok(conn) => {
                {
                    let mut core = self.core.lock().unwrap();
                    if core.generation != generation {
                        // Superseded while creating; discard the fresh handle
                        drop(core);
                        let handle = conn.handle.clone();
                        tokio::spawn(async move { handle.close().await });
                        return Ok(());
                    }
                    core.handle = Some(conn.handle.clone());
                }
                let pump = tokio::spawn(Self::run_event_pump(
                    self.clone(),
                    generation,
                    conn.events,
                ));
                let mut core = self.core.lock().unwrap();
                if core.generation == generation {
                    core.event_pump = Some(pump);
                }
                Ok(())
            }
            Err(e) => {
                {
                    let mut core = self.core.lock().unwrap();
                    if core.generation == generation {
                        core.permit = None;
                        core.state = SessionState::Closed;
                        core.last_close = Some(CloseReasonKind::Retryable);
                        core.last_error = Some(e.to_string());
                        core.attempt_count += 1;
                    }
                }
                // Setup failures retry like any other retryable close
                let attempt = self.core.lock().unwrap().attempt_count.saturating_sub(1);
                let delay = BackoffSchedule::from_config(&self.deps.reconnect_config)
                    .delay_for_attempt(attempt);
                self.schedule_retry(delay, false);
                Err(AppError::TransportCreateFailed(e.to_string()))
            }
        }
    }

    /// Tear down the connection. With `wipe_credentials`, also removes the
    /// persisted bundle and destroys the session.
    pub async fn disconnect(self: &Arc<Self>, wipe_credentials: bool) -> Result<(), AppError> {
        let _op = self.op_lock.lock().await;

        let parts = self.begin_teardown();
        {
            let mut core = self.core.lock().unwrap();
            core.state = SessionState::Closed;
            core.qr = None;
            core.pairing = None;
            core.heartbeat_failures = 0;
        }
        Self::finish_teardown(parts).await;
        self.artifact_notify.notify_waiters();

        if wipe_credentials {
            self.deps
                .store
                .wipe(&self.tenant_id)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(&self.tenant_id);
            }
        }

        tracing::info!(
            tenant_id = %self.tenant_id,
            wipe_credentials = wipe_credentials,
            "Session disconnected"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Best-effort send over the open connection.
    pub async fn send(
        self: &Arc<Self>,
        destination: &str,
        message: &str,
    ) -> Result<SendReceipt, AppError> {
        let (handle, generation) = {
            let core = self.core.lock().unwrap();
            if core.state != SessionState::Open {
                return Err(AppError::NotConnected(self.tenant_id.clone()));
            }
            match core.handle.clone() {
                Some(handle) => (handle, core.generation),
                None => return Err(AppError::NotConnected(self.tenant_id.clone())),
            }
        };

        match handle.send(destination, message).await {
            Ok(receipt) => {
                metrics::MESSAGES_SENT_TOTAL.inc();
                Ok(receipt)
            }
            Err(TransportError::ConnectionLost(msg)) => {
                metrics::MESSAGES_FAILED_TOTAL.inc();
                // Same reconnection path as a detected close, then surface
                // the original failure to the caller.
                self.handle_close(
                    generation,
                    CloseReasonKind::Transient,
                    "connection lost during send",
                    false,
                )
                .await;
                Err(AppError::ConnectionLost(msg))
            }
            Err(TransportError::NotConnected) => {
                metrics::MESSAGES_FAILED_TOTAL.inc();
                Err(AppError::NotConnected(self.tenant_id.clone()))
            }
            Err(e) => {
                metrics::MESSAGES_FAILED_TOTAL.inc();
                Err(AppError::Internal(e.to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Credential bootstrap artifacts
    // ------------------------------------------------------------------

    /// Return a cached unexpired QR artifact, or wait (bounded) for the next
    /// one. `force_new` tears everything down and forces a fresh challenge.
    pub async fn request_qr(
        self: &Arc<Self>,
        force_new: bool,
    ) -> Result<ArtifactOutcome<QrArtifact>, AppError> {
        let ttl = self.deps.session_config.qr_ttl_secs;

        if force_new {
            self.core.lock().unwrap().phone_number = None;
            self.start(true).await?;
        } else {
            {
                let core = self.core.lock().unwrap();
                if core.state == SessionState::Open {
                    return Ok(ArtifactOutcome::AlreadyConnected);
                }
                if let Some(qr) = core.qr.as_ref() {
                    if !qr.is_expired(ttl) {
                        return Ok(ArtifactOutcome::Ready(qr.clone()));
                    }
                }
            }
            // Kick a dormant session; an Idle session already has its
            // initial start scheduled by the registry.
            let needs_kick = {
                let core = self.core.lock().unwrap();
                matches!(core.state, SessionState::Closed | SessionState::Errored)
                    && !core.pending_retry_alive()
            };
            if needs_kick {
                self.start(false).await?;
            }
        }

        self.wait_for_artifact(|core| {
            if core.state == SessionState::Open {
                return Some(ArtifactOutcome::AlreadyConnected);
            }
            core.qr
                .as_ref()
                .filter(|qr| !qr.is_expired(ttl))
                .map(|qr| ArtifactOutcome::Ready(qr.clone()))
        })
        .await
    }

    /// Register via pairing code: requires a clean device registration, so
    /// this always wipes credentials and restarts with the phone attached.
    pub async fn request_pairing(
        self: &Arc<Self>,
        phone_number: String,
    ) -> Result<ArtifactOutcome<PairingArtifact>, AppError> {
        self.core.lock().unwrap().phone_number = Some(phone_number);
        self.start(true).await?;

        self.wait_for_artifact(|core| {
            if core.state == SessionState::Open {
                return Some(ArtifactOutcome::AlreadyConnected);
            }
            core.pairing
                .as_ref()
                .map(|p| ArtifactOutcome::Ready(p.clone()))
        })
        .await
    }

    /// Bounded notification-based wait: resolves as soon as `check` yields,
    /// or answers `Pending` once the artifact wait bound elapses.
    async fn wait_for_artifact<T>(
        &self,
        check: impl Fn(&SessionCore) -> Option<ArtifactOutcome<T>>,
    ) -> Result<ArtifactOutcome<T>, AppError> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.deps.session_config.artifact_wait_secs);

        loop {
            let notified = self.artifact_notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a notify between the
            // check and the await is not lost.
            notified.as_mut().enable();

            {
                let core = self.core.lock().unwrap();
                if let Some(outcome) = check(&core) {
                    return Ok(outcome);
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Ok(ArtifactOutcome::Pending);
            }
        }
    }

    // ------------------------------------------------------------------
    // Liveness probing (driven by the liveness task)
    // ------------------------------------------------------------------

    pub async fn run_probe(
        self: &Arc<Self>,
        probe_timeout: Duration,
        failure_threshold: u32,
    ) -> ProbeOutcome {
        let (handle, generation) = {
            let core = self.core.lock().unwrap();
            if core.state != SessionState::Open {
                return ProbeOutcome::Skipped;
            }
            match core.handle.clone() {
                Some(handle) => (handle, core.generation),
                None => return ProbeOutcome::Skipped,
            }
        };

        let healthy = matches!(
            tokio::time::timeout(probe_timeout, handle.probe()).await,
            Ok(Ok(()))
        );

        if healthy {
            let mut core = self.core.lock().unwrap();
            if core.generation == generation {
                core.heartbeat_failures = 0;
            }
            return ProbeOutcome::Healthy;
        }

        let failures = {
            let mut core = self.core.lock().unwrap();
            if core.generation != generation || core.state != SessionState::Open {
                return ProbeOutcome::Skipped;
            }
            core.heartbeat_failures += 1;
            core.heartbeat_failures
        };
        metrics::PROBE_FAILURES_TOTAL.inc();

        if failures >= failure_threshold {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                failures = failures,
                "Probe failure threshold reached, forcing close"
            );
            self.handle_close(
                generation,
                CloseReasonKind::Transient,
                "connection lost (probe failures)",
                false,
            )
            .await;
            ProbeOutcome::ForcedClose
        } else {
            ProbeOutcome::Failing(failures)
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    async fn run_event_pump(
        session: Arc<Session>,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !session.is_current(generation) {
                return;
            }
            match event {
                TransportEvent::QrChallenge { payload } => {
                    session.on_qr_challenge(generation, payload);
                }
                TransportEvent::PairingReady => {
                    session.on_pairing_ready(generation).await;
                }
                TransportEvent::Open { credentials } => {
                    session.on_open(generation, credentials).await;
                }
                TransportEvent::CredentialsRotated { credentials } => {
                    if let Err(e) = session.deps.store.save(&session.tenant_id, &credentials).await
                    {
                        tracing::warn!(
                            tenant_id = %session.tenant_id,
                            error = %e,
                            "Failed to persist rotated credentials"
                        );
                    }
                }
                TransportEvent::Closed { code, message } => {
                    let kind = CloseReasonKind::classify(code);
                    tracing::debug!(
                        tenant_id = %session.tenant_id,
                        code = ?code,
                        reason = ?kind,
                        "Transport reported close"
                    );
                    session.handle_close(generation, kind, &message, true).await;
                    return;
                }
            }
        }

        // Stream ended without a close event: transient loss
        session
            .handle_close(
                generation,
                CloseReasonKind::Transient,
                "event stream ended",
                true,
            )
            .await;
    }

    fn on_qr_challenge(self: &Arc<Self>, generation: u64, payload: String) {
        let issued_at;
        {
            let mut core = self.core.lock().unwrap();
            if core.generation != generation {
                return;
            }
            let artifact = QrArtifact::new(payload);
            issued_at = artifact.issued_at;
            core.qr = Some(artifact);
            core.pairing = None;
            core.permit = None;
            if matches!(
                core.state,
                SessionState::Connecting | SessionState::AwaitingQr
            ) {
                core.state = SessionState::AwaitingQr;
            }
        }
        metrics::QR_ISSUED_TOTAL.inc();
        self.artifact_notify.notify_waiters();

        // TTL expiry is independent of connection state; a replaced artifact
        // is left alone because its issuance timestamp no longer matches.
        let session = self.clone();
        let ttl = self.deps.session_config.qr_ttl_secs;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ttl)).await;
            let mut core = session.core.lock().unwrap();
            if core.qr.as_ref().map(|q| q.issued_at) == Some(issued_at) {
                core.qr = None;
                tracing::debug!(tenant_id = %session.tenant_id, "QR artifact expired");
            }
        });
    }

    async fn on_pairing_ready(self: &Arc<Self>, generation: u64) {
        let (handle, phone_number) = {
            let mut core = self.core.lock().unwrap();
            if core.generation != generation {
                return;
            }
            core.permit = None;
            core.state = SessionState::AwaitingPairing;
            let (Some(handle), Some(phone_number)) =
                (core.handle.clone(), core.phone_number.clone())
            else {
                return;
            };
            (handle, phone_number)
        };

        match handle.request_pairing_code(&phone_number).await {
            Ok(code) => {
                {
                    let mut core = self.core.lock().unwrap();
                    if core.generation != generation {
                        return;
                    }
                    core.pairing = Some(PairingArtifact::new(phone_number, code));
                    core.qr = None;
                }
                metrics::PAIRING_CODES_TOTAL.inc();
                self.artifact_notify.notify_waiters();
            }
            Err(e) => {
                let mut core = self.core.lock().unwrap();
                if core.generation == generation {
                    core.state = SessionState::Errored;
                    core.last_error = Some(format!("pairing code request failed: {}", e));
                }
                tracing::warn!(
                    tenant_id = %self.tenant_id,
                    error = %e,
                    "Pairing code request failed"
                );
            }
        }
    }

    async fn on_open(self: &Arc<Self>, generation: u64, credentials: Credentials) {
        if let Err(e) = self.deps.store.save(&self.tenant_id, &credentials).await {
            tracing::warn!(
                tenant_id = %self.tenant_id,
                error = %e,
                "Failed to persist credentials on open"
            );
        }
        {
            let mut core = self.core.lock().unwrap();
            if core.generation != generation {
                return;
            }
            core.state = SessionState::Open;
            core.qr = None;
            core.pairing = None;
            core.permit = None;
            core.phone_number = None;
            core.attempt_count = 0;
            core.heartbeat_failures = 0;
            core.last_close = None;
            core.last_error = None;
        }
        self.artifact_notify.notify_waiters();
        tracing::info!(tenant_id = %self.tenant_id, "Connection open");
    }

    /// The close path: classify, tear down, and schedule what comes next.
    /// `from_pump` avoids aborting the event pump from within itself.
    async fn handle_close(
        self: &Arc<Self>,
        generation: u64,
        kind: CloseReasonKind,
        message: &str,
        from_pump: bool,
    ) {
        let (handle, pump, attempt) = {
            let mut core = self.core.lock().unwrap();
            if core.generation != generation {
                return;
            }
            core.generation += 1;
            let handle = core.handle.take();
            let pump = core.event_pump.take();
            core.permit = None;
            core.state = SessionState::Closed;
            core.heartbeat_failures = 0;
            core.last_close = Some(kind);
            core.last_error = Some(message.to_string());
            core.attempt_count += 1;
            (handle, pump, core.attempt_count)
        };

        if !from_pump {
            if let Some(pump) = pump {
                pump.abort();
            }
        }
        if let Some(handle) = handle {
            tokio::spawn(async move { handle.close().await });
        }

        metrics::RECONNECTS_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::warn!(
            tenant_id = %self.tenant_id,
            reason = ?kind,
            message = %message,
            attempt = attempt,
            "Connection closed"
        );

        match kind.retry_action(&self.deps.reconnect_config, attempt.saturating_sub(1)) {
            RetryAction::Drop => {
                if let Err(e) = self.deps.store.wipe(&self.tenant_id).await {
                    tracing::warn!(
                        tenant_id = %self.tenant_id,
                        error = %e,
                        "Failed to wipe credentials on sign-out"
                    );
                }
                {
                    let mut core = self.core.lock().unwrap();
                    core.qr = None;
                    core.pairing = None;
                }
                self.artifact_notify.notify_waiters();
                if let Some(registry) = self.registry.upgrade() {
                    registry.remove(&self.tenant_id);
                }
                tracing::info!(
                    tenant_id = %self.tenant_id,
                    "Signed out; credentials wiped, session destroyed"
                );
            }
            RetryAction::FreshStart(delay) => {
                if let Err(e) = self.deps.store.wipe(&self.tenant_id).await {
                    tracing::warn!(
                        tenant_id = %self.tenant_id,
                        error = %e,
                        "Failed to wipe credentials after auth failure"
                    );
                }
                self.schedule_retry(delay, true);
            }
            RetryAction::Restart(delay) => {
                self.schedule_retry(delay, false);
            }
        }
    }

    /// Schedule the single authoritative reconnect timer. The timer task
    /// never invokes `start` directly: it detaches a separate task first, so
    /// cancelling the timer can never cancel a start already underway.
    fn schedule_retry(self: &Arc<Self>, delay: Duration, force_new: bool) {
        let session = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.core.lock().unwrap().pending_retry = None;
            let session2 = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session2.start(force_new).await {
                    tracing::warn!(
                        tenant_id = %session2.tenant_id,
                        error = %e,
                        "Scheduled reconnect failed"
                    );
                }
            });
        });

        let mut core = self.core.lock().unwrap();
        if let Some(old) = core.pending_retry.replace(timer) {
            old.abort();
        }
        tracing::debug!(
            tenant_id = %self.tenant_id,
            delay_ms = delay.as_millis() as u64,
            force_new = force_new,
            "Reconnect scheduled"
        );
    }

    // ------------------------------------------------------------------
    // Teardown plumbing
    // ------------------------------------------------------------------

    /// Invalidate the current attempt: bump the generation, cancel the
    /// pending retry (idempotent), and detach handle/pump for async cleanup.
    fn begin_teardown(&self) -> TeardownParts {
        let mut core = self.core.lock().unwrap();
        core.generation += 1;
        if let Some(timer) = core.pending_retry.take() {
            timer.abort();
        }
        core.permit = None;
        TeardownParts {
            handle: core.handle.take(),
            pump: core.event_pump.take(),
        }
    }

    async fn finish_teardown(parts: TeardownParts) {
        if let Some(pump) = parts.pump {
            pump.abort();
        }
        if let Some(handle) = parts.handle {
            handle.close().await;
        }
    }
}

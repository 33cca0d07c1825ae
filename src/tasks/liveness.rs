use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;

use crate::config::HeartbeatConfig;
use crate::metrics;
use crate::session::{ProbeOutcome, SessionRegistry, SessionState};

/// Background task probing open sessions for silently dead connections.
///
/// The transport's own close event is not always delivered when a socket
/// dies quietly; this task notices via failed probes and forces the session
/// through the normal close/reconnect path.
pub struct LivenessTask {
    config: HeartbeatConfig,
    registry: Arc<SessionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl LivenessTask {
    pub fn new(
        config: HeartbeatConfig,
        registry: Arc<SessionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        let mut probe_timer =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        // Skip immediate first tick
        probe_timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_secs,
            probe_timeout_secs = self.config.probe_timeout_secs,
            failure_threshold = self.config.failure_threshold,
            "Liveness task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Liveness task received shutdown signal");
                    break;
                }
                _ = probe_timer.tick() => {
                    self.probe_round().await;
                }
            }
        }

        tracing::info!("Liveness task stopped");
    }

    /// Probe every open session once, in parallel.
    pub async fn probe_round(&self) {
        let sessions = self.registry.sessions();
        let counts = self.registry.counts();
        metrics::SESSIONS_TOTAL.set(counts.total_count as i64);
        metrics::SESSIONS_OPEN.set(counts.active_count as i64);

        let open: Vec<_> = sessions
            .into_iter()
            .filter(|s| s.state() == SessionState::Open)
            .collect();
        if open.is_empty() {
            return;
        }

        let start = Instant::now();
        let probe_timeout = Duration::from_secs(self.config.probe_timeout_secs);
        let threshold = self.config.failure_threshold;

        let outcomes = join_all(open.iter().map(|session| {
            let session = session.clone();
            async move { session.run_probe(probe_timeout, threshold).await }
        }))
        .await;

        let mut healthy = 0usize;
        let mut failing = 0usize;
        let mut forced = 0usize;
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Healthy => healthy += 1,
                ProbeOutcome::Failing(_) => failing += 1,
                ProbeOutcome::ForcedClose => forced += 1,
                ProbeOutcome::Skipped => {}
            }
        }

        tracing::debug!(
            probed = open.len(),
            healthy = healthy,
            failing = failing,
            forced_closed = forced,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Probe round completed"
        );

        if forced > 0 {
            tracing::warn!(
                forced_closed = forced,
                "Connections declared lost by liveness probing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateConfig, ReconnectConfig, SessionConfig};
    use crate::gate::AdmissionGate;
    use crate::session::SessionDeps;
    use crate::storage::MemoryCredentialStore;
    use crate::transport::MemoryTransport;

    fn test_registry() -> (Arc<SessionRegistry>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let registry = SessionRegistry::new(SessionDeps {
            transport: transport.clone(),
            store: Arc::new(MemoryCredentialStore::new()),
            gate: Arc::new(AdmissionGate::new(&GateConfig::default())),
            session_config: SessionConfig::default(),
            reconnect_config: ReconnectConfig::default(),
        });
        (registry, transport)
    }

    #[tokio::test]
    async fn test_liveness_task_shutdown() {
        let (registry, _transport) = test_registry();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = LivenessTask::new(HeartbeatConfig::default(), registry, shutdown_rx);
        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_probe_round_with_no_open_sessions() {
        let (registry, _transport) = test_registry();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        registry.get_or_create("u1");
        let task = LivenessTask::new(HeartbeatConfig::default(), registry, shutdown_rx);

        // No open sessions: the round is a no-op and must not panic
        task.probe_round().await;
    }
}

//! Graceful shutdown handling for the session gateway.
//!
//! Coordinated shutdown:
//! 1. Signals background tasks (liveness, sweeper) to stop
//! 2. Tears down every live transport connection without scheduling
//!    reconnects, so the remote network sees clean closes
//! 3. Bounded wait so a wedged transport cannot stall process exit

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::session::SessionRegistry;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for all sessions to tear down (default: 10 seconds)
    pub teardown_timeout: Duration,
    /// Per-session teardown timeout (default: 2 seconds)
    pub per_session_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(10),
            per_session_timeout: Duration::from_secs(2),
        }
    }
}

/// Handles graceful shutdown of the session gateway
pub struct GracefulShutdown {
    registry: Arc<SessionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<SessionRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            registry,
            shutdown_tx,
            config: ShutdownConfig::default(),
        }
    }

    pub fn with_config(
        registry: Arc<SessionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: Signal background tasks to stop
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Signaling background tasks");
        let _ = self.shutdown_tx.send(());

        // Phase 2: Tear down live connections
        tracing::info!("Phase 2: Tearing down sessions");
        result.sessions_closed = self.teardown_sessions().await;

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            sessions_closed = result.sessions_closed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Disconnect every session, bounded per session and overall.
    async fn teardown_sessions(&self) -> usize {
        let sessions = self.registry.sessions();
        let total = sessions.len();
        if total == 0 {
            return 0;
        }

        tracing::info!(total_sessions = total, "Tearing down sessions");

        let per_session = self.config.per_session_timeout;
        let mut futures = FuturesUnordered::new();
        for session in sessions {
            futures.push(async move {
                match timeout(per_session, session.disconnect(false)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(
                            tenant_id = %session.tenant_id(),
                            error = %e,
                            "Session teardown failed"
                        );
                        false
                    }
                    Err(_) => {
                        tracing::debug!(
                            tenant_id = %session.tenant_id(),
                            "Session teardown timed out"
                        );
                        false
                    }
                }
            });
        }

        let mut closed = 0;
        let drain = async {
            while let Some(ok) = futures.next().await {
                if ok {
                    closed += 1;
                }
            }
        };
        let _ = timeout(self.config.teardown_timeout, drain).await;

        if closed < total {
            tracing::warn!(
                closed = closed,
                total = total,
                "Some sessions did not tear down cleanly"
            );
        }

        closed
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether shutdown completed successfully
    pub success: bool,
    /// Number of sessions that tore down cleanly
    pub sessions_closed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateConfig, ReconnectConfig, SessionConfig};
    use crate::gate::AdmissionGate;
    use crate::session::SessionDeps;
    use crate::storage::MemoryCredentialStore;
    use crate::transport::MemoryTransport;

    fn test_registry() -> Arc<SessionRegistry> {
        SessionRegistry::new(SessionDeps {
            transport: Arc::new(MemoryTransport::new()),
            store: Arc::new(MemoryCredentialStore::new()),
            gate: Arc::new(AdmissionGate::new(&GateConfig::default())),
            session_config: SessionConfig::default(),
            reconnect_config: ReconnectConfig::default(),
        })
    }

    #[tokio::test]
    async fn test_shutdown_no_sessions() {
        let registry = test_registry();
        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(registry, tx);

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.sessions_closed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_sessions() {
        let registry = test_registry();
        registry.get_or_create("u1");
        registry.get_or_create("u2");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(registry.clone(), tx);
        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.sessions_closed, 2);
        for session in registry.sessions() {
            assert_eq!(session.state(), crate::session::SessionState::Closed);
            assert!(!session.has_pending_retry());
        }
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.teardown_timeout, Duration::from_secs(10));
        assert_eq!(config.per_session_timeout, Duration::from_secs(2));
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::SweeperConfig;
use crate::session::{SessionRegistry, SessionState};
use crate::storage::CredentialStore;

/// Safety net against lost reconnect timers.
///
/// On a long interval, any session sitting in `Closed` with persisted
/// credentials and no pending retry is restarted. It never forces new
/// credentials and never touches an in-flight attempt.
pub struct RecoverySweeper {
    config: SweeperConfig,
    registry: Arc<SessionRegistry>,
    store: Arc<dyn CredentialStore>,
    shutdown: broadcast::Receiver<()>,
}

impl RecoverySweeper {
    pub fn new(
        config: SweeperConfig,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn CredentialStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        // Skip immediate first tick
        sweep_timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Recovery sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Recovery sweeper received shutdown signal");
                    break;
                }
                _ = sweep_timer.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        tracing::info!("Recovery sweeper stopped");
    }

    /// One pass over all registered sessions.
    pub async fn sweep_once(&self) {
        let mut revived = 0usize;

        for session in self.registry.sessions() {
            if session.state() != SessionState::Closed || session.has_pending_retry() {
                continue;
            }
            if !self.store.exists(session.tenant_id()).await {
                continue;
            }

            tracing::info!(
                tenant_id = %session.tenant_id(),
                "Reviving closed session with persisted credentials"
            );
            revived += 1;
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.start(false).await {
                    tracing::warn!(
                        tenant_id = %session.tenant_id(),
                        error = %e,
                        "Sweeper-initiated restart failed"
                    );
                }
            });
        }

        if revived > 0 {
            tracing::info!(revived = revived, "Recovery sweep completed");
        } else {
            tracing::debug!("Recovery sweep completed, nothing to revive");
        }
    }
}

//! Session registry: the single source of truth for "does tenant X have a
//! session".

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use super::session::{Session, SessionDeps};
use super::types::{SessionState, StatusSnapshot};

/// One row of `listSessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub tenant_id: String,
    pub state: SessionState,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegistryCounts {
    /// Sessions with an open connection
    pub active_count: usize,
    pub total_count: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    deps: Arc<SessionDeps>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            deps: Arc::new(deps),
        })
    }

    /// Look up or create the session for a tenant. Creation is observed
    /// exactly once under concurrency, and a freshly created session gets an
    /// initial connection attempt scheduled with its persisted credentials.
    pub fn get_or_create(self: &Arc<Self>, tenant_id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.get(tenant_id) {
            return session.clone();
        }

        match self.sessions.entry(tenant_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(
                    tenant_id.to_string(),
                    self.deps.clone(),
                    Arc::downgrade(self),
                ));
                entry.insert(session.clone());
                tracing::info!(tenant_id = %tenant_id, "Session created");

                let starter = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = starter.start(false).await {
                        tracing::debug!(
                            tenant_id = %starter.tenant_id(),
                            error = %e,
                            "Initial connection attempt failed"
                        );
                    }
                });
                session
            }
        }
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(tenant_id).map(|s| s.clone())
    }

    /// Idempotent: removing an unknown tenant is a no-op.
    pub fn remove(&self, tenant_id: &str) {
        if self.sessions.remove(tenant_id).is_some() {
            tracing::info!(tenant_id = %tenant_id, "Session removed from registry");
        }
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|e| {
                let state = e.value().state();
                SessionSummary {
                    tenant_id: e.key().clone(),
                    state,
                    connected: state == SessionState::Open,
                }
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.sessions.iter().map(|e| e.value().status()).collect()
    }

    pub fn counts(&self) -> RegistryCounts {
        let total_count = self.sessions.len();
        let active_count = self
            .sessions
            .iter()
            .filter(|e| e.value().state() == SessionState::Open)
            .count();
        RegistryCounts {
            active_count,
            total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateConfig, ReconnectConfig, SessionConfig};
    use crate::gate::AdmissionGate;
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
    async fn test_get_or_create_returns_same_instance() {
        let registry = test_registry();

        let a = registry.get_or_create("u1");
        let b = registry.get_or_create("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.counts().total_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_single_creation() {
        let registry = test_registry();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create("u1")
            }));
        }

        let sessions: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        for s in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], s));
        }
        assert_eq!(registry.counts().total_count, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = test_registry();
        registry.get_or_create("u1");

        registry.remove("u1");
        assert!(registry.get("u1").is_none());
        registry.remove("u1");
        registry.remove("never-existed");
    }

    #[tokio::test]
    async fn test_list_reports_states() {
        let registry = test_registry();
        registry.get_or_create("u1");
        registry.get_or_create("u2");

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|s| !s.connected));
    }
}

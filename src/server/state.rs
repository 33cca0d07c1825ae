use std::sync::Arc;

use crate::config::Settings;
use crate::gate::AdmissionGate;
use crate::session::{SessionDeps, SessionRegistry};
use crate::storage::{CredentialStore, FileCredentialStore};
use crate::transport::{create_transport, Transport};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn CredentialStore>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let transport = create_transport(&settings.transport);
        let store: Arc<dyn CredentialStore> =
            Arc::new(FileCredentialStore::new(settings.storage.root.clone()));
        Self::with_components(settings, transport, store)
    }

    /// Build with explicit transport/storage backends (used by tests).
    pub fn with_components(
        settings: Settings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let gate = Arc::new(AdmissionGate::new(&settings.gate));
        let registry = SessionRegistry::new(SessionDeps {
            transport,
            store: store.clone(),
            gate,
            session_config: settings.session.clone(),
            reconnect_config: settings.reconnect.clone(),
        });

        Self {
            settings: Arc::new(settings),
            registry,
            store,
        }
    }
}

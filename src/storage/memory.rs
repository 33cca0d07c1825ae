//! In-memory credential store, used by tests and local development.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CredentialStore, Credentials, StorageError};

#[derive(Default)]
pub struct MemoryCredentialStore {
    bundles: DashMap<String, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<Credentials>, StorageError> {
        Ok(self.bundles.get(tenant_id).map(|c| c.clone()))
    }

    async fn save(&self, tenant_id: &str, credentials: &Credentials) -> Result<(), StorageError> {
        self.bundles
            .insert(tenant_id.to_string(), credentials.clone());
        Ok(())
    }

    async fn wipe(&self, tenant_id: &str) -> Result<(), StorageError> {
        self.bundles.remove(tenant_id);
        Ok(())
    }

    async fn exists(&self, tenant_id: &str) -> bool {
        self.bundles.contains_key(tenant_id)
    }
}

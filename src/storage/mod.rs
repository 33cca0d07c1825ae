//! Persisted credential bundles, one per tenant id.
//!
//! Removing a bundle is the sole mechanism for forcing a tenant to
//! re-register with the remote network.

mod file;
mod memory;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Credential bundle issued by the remote network for one registered device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub device_id: Uuid,
    pub auth_token: String,
    pub registered_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(auth_token: String) -> Self {
        Self {
            device_id: Uuid::new_v4(),
            auth_token,
            registered_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the bundle for a tenant, `None` if the tenant never registered
    /// or was wiped.
    async fn load(&self, tenant_id: &str) -> Result<Option<Credentials>, StorageError>;

    async fn save(&self, tenant_id: &str, credentials: &Credentials) -> Result<(), StorageError>;

    /// Idempotent: wiping an absent bundle is a no-op.
    async fn wipe(&self, tenant_id: &str) -> Result<(), StorageError>;

    async fn exists(&self, tenant_id: &str) -> bool;
}

//! File-backed credential store: one JSON bundle per tenant under a
//! configured root directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::{CredentialStore, Credentials, StorageError};

pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bundle_path(&self, tenant_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(tenant_id)))
    }

    async fn ensure_root(&self) -> Result<(), StorageError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).await?;
        }
        Ok(())
    }
}

/// Tenant ids are opaque; keep the filename filesystem-safe.
fn sanitize(tenant_id: &str) -> String {
    tenant_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<Credentials>, StorageError> {
        let path = self.bundle_path(tenant_id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let creds = serde_json::from_slice(&bytes)?;
                Ok(Some(creds))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, tenant_id: &str, credentials: &Credentials) -> Result<(), StorageError> {
        self.ensure_root().await?;
        let path = self.bundle_path(tenant_id);
        let bytes = serde_json::to_vec_pretty(credentials)?;

        // Write to a temp file first so a crash mid-write never leaves a
        // truncated bundle behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(tenant_id = %tenant_id, path = %path.display(), "Credentials saved");
        Ok(())
    }

    async fn wipe(&self, tenant_id: &str) -> Result<(), StorageError> {
        let path = self.bundle_path(tenant_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(tenant_id = %tenant_id, "Credentials wiped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, tenant_id: &str) -> bool {
        self.bundle_path(tenant_id).exists()
    }
}

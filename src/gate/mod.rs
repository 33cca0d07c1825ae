//! Connection admission gate.
//!
//! Bounds how many sessions may be simultaneously establishing a transport
//! connection, independent of how many tenants attempt to connect at once.
//! Waiters are admitted in FIFO order (the queueing discipline of
//! `tokio::sync::Semaphore`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::GateConfig;
use crate::error::AppError;

/// A held admission slot. Dropping it releases the slot to the
/// longest-waiting pending caller.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl AdmissionGate {
    pub fn new(config: &GateConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
        }
    }

    /// Wait for a free slot, up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AppError> {
        match timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionPermit { _permit: permit }),
            // The semaphore is never closed
            Ok(Err(_)) => Err(AppError::Internal("admission gate closed".to_string())),
            Err(_) => Err(AppError::AdmissionTimeout(self.acquire_timeout.as_secs())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

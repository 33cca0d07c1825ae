//! Transport backend selection.

use std::sync::Arc;

use crate::config::TransportConfig;

use super::{MemoryTransport, Transport};

pub fn create_transport(config: &TransportConfig) -> Arc<dyn Transport> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!("Using in-process simulated transport backend");
            Arc::new(MemoryTransport::new())
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown transport backend, falling back to memory"
            );
            Arc::new(MemoryTransport::new())
        }
    }
}

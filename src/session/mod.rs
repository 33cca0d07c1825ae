//! Per-tenant session lifecycle: state machine, close classification,
//! reconnect scheduling, and the registry that owns every session.

mod backoff;
mod close_reason;
mod registry;
#[allow(clippy::module_inception)]
mod session;
mod types;

pub use backoff::BackoffSchedule;
pub use close_reason::{CloseReasonKind, RetryAction};
pub use registry::{RegistryCounts, SessionRegistry, SessionSummary};
pub use session::{ProbeOutcome, Session, SessionDeps};
pub use types::{ArtifactOutcome, PairingArtifact, QrArtifact, SessionState, StatusSnapshot};

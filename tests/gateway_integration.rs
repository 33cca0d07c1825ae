//! End-to-end session lifecycle tests over the public crate API.
//!
//! These run against the in-process simulated transport and the memory
//! credential store, so no external network or filesystem is required.

use std::sync::Arc;
use std::time::Duration;

use orbit_gateway::config::{
    ApiConfig, GateConfig, ReconnectConfig, ServerConfig, SessionConfig, Settings, StorageConfig,
    SweeperConfig, TransportConfig,
};
use orbit_gateway::config::HeartbeatConfig;
use orbit_gateway::gate::AdmissionGate;
use orbit_gateway::server::AppState;
use orbit_gateway::session::{
    ArtifactOutcome, CloseReasonKind, ProbeOutcome, SessionDeps, SessionRegistry, SessionState,
};
use orbit_gateway::storage::{CredentialStore, Credentials, MemoryCredentialStore};
use orbit_gateway::tasks::RecoverySweeper;
use orbit_gateway::transport::{close_code, MemoryTransport};

/// Create a registry wired to the simulated transport and memory store
fn create_test_environment() -> TestEnvironment {
    create_test_environment_with(SessionConfig {
        qr_ttl_secs: 60,
        artifact_wait_secs: 3,
    })
}

fn create_test_environment_with(session_config: SessionConfig) -> TestEnvironment {
    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(MemoryCredentialStore::new());
    let registry = SessionRegistry::new(SessionDeps {
        transport: transport.clone(),
        store: store.clone(),
        gate: Arc::new(AdmissionGate::new(&GateConfig {
            capacity: 2,
            acquire_timeout_secs: 10,
        })),
        session_config,
        reconnect_config: ReconnectConfig::default(),
    });

    TestEnvironment {
        registry,
        transport,
        store,
    }
}

struct TestEnvironment {
    registry: Arc<SessionRegistry>,
    transport: Arc<MemoryTransport>,
    store: Arc<MemoryCredentialStore>,
}

impl TestEnvironment {
    async fn wait_for_state(&self, tenant_id: &str, state: SessionState) {
        for _ in 0..300 {
            if let Some(session) = self.registry.get(tenant_id) {
                if session.state() == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "tenant {} did not reach {:?} within 3s (current: {:?})",
            tenant_id,
            state,
            self.registry.get(tenant_id).map(|s| s.state())
        );
    }

    async fn wait_until(&self, mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 3s");
    }
}

// =============================================================================
// Credential bootstrap (QR / pairing)
// =============================================================================

#[tokio::test]
async fn test_fresh_tenant_receives_qr_within_bound() {
    let env = create_test_environment();
    let session = env.registry.get_or_create("u1");

    // No prior credentials: the bounded wait resolves with a fresh artifact
    match session.request_qr(false).await.unwrap() {
        ArtifactOutcome::Ready(qr) => {
            assert!(!qr.payload.is_empty());
            assert!(!qr.is_expired(60));
        }
        other => panic!("expected a QR artifact, got {:?}", other),
    }

    let status = session.status();
    assert_eq!(status.state, SessionState::AwaitingQr);
    assert!(!status.connected);
    assert!(status.qr_present);
}

#[tokio::test]
async fn test_scan_opens_connection_and_send_succeeds() {
    let env = create_test_environment();
    let session = env.registry.get_or_create("u1");

    match session.request_qr(false).await.unwrap() {
        ArtifactOutcome::Ready(_) => {}
        other => panic!("expected a QR artifact, got {:?}", other),
    }

    assert!(env.transport.complete_scan("u1").await);
    env.wait_for_state("u1", SessionState::Open).await;

    // Scanning registered the device: a credential bundle is persisted
    assert!(env.store.exists("u1").await);

    let receipt = session.send("+15550001111", "hi").await.unwrap();
    assert!(!receipt.message_id.is_nil());

    let status = session.status();
    assert!(status.connected);
    assert!(!status.qr_present);
}

#[tokio::test]
async fn test_pairing_code_issued_for_phone_number() {
    let env = create_test_environment();
    let session = env.registry.get_or_create("u1");

    match session
        .request_pairing("+15550002222".to_string())
        .await
        .unwrap()
    {
        ArtifactOutcome::Ready(artifact) => {
            assert_eq!(artifact.phone_number, "+15550002222");
            assert!(!artifact.code.is_empty());
        }
        other => panic!("expected a pairing code, got {:?}", other),
    }

    assert_eq!(session.state(), SessionState::AwaitingPairing);
    assert!(session.status().pairing_present);
}

#[tokio::test]
async fn test_qr_request_reports_pending_when_bound_elapses() {
    // A zero wait bound answers before the simulated transport can issue
    let env = create_test_environment_with(SessionConfig {
        qr_ttl_secs: 60,
        artifact_wait_secs: 0,
    });
    let session = env.registry.get_or_create("u1");

    match session.request_qr(false).await.unwrap() {
        ArtifactOutcome::Pending => {}
        other => panic!("expected pending, got {:?}", other),
    }
}

// =============================================================================
// Reconnection policy
// =============================================================================

#[tokio::test]
async fn test_conflict_close_backs_off_with_credentials_kept() {
    let env = create_test_environment();
    env.store
        .save("u1", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    env.registry.get_or_create("u1");
    env.wait_for_state("u1", SessionState::Open).await;

    env.transport
        .inject_close("u1", Some(close_code::CONNECTION_REPLACED), "replaced")
        .await;
    env.wait_for_state("u1", SessionState::Closed).await;

    let session = env.registry.get("u1").unwrap();
    assert_eq!(
        session.status().last_close_reason,
        Some(CloseReasonKind::Conflict)
    );
    // Longest fixed delay: the retry is parked, credentials survive
    assert!(session.has_pending_retry());
    assert!(env.store.exists("u1").await);
}

#[tokio::test]
async fn test_signed_out_close_destroys_tenant() {
    let env = create_test_environment();
    env.store
        .save("u1", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    env.registry.get_or_create("u1");
    env.wait_for_state("u1", SessionState::Open).await;

    env.transport
        .inject_close("u1", Some(close_code::LOGGED_OUT), "logged out")
        .await;

    let registry = env.registry.clone();
    env.wait_until(move || registry.get("u1").is_none()).await;
    assert!(!env.store.exists("u1").await);

    // A later status query lazily recreates the tenant from scratch
    let session = env.registry.get_or_create("u1");
    let status = session.status();
    assert!(!status.connected);
    assert!(!status.qr_present);
    assert!(!status.pairing_present);
}

#[tokio::test]
async fn test_transient_close_reconnects_automatically() {
    let env = create_test_environment();
    env.store
        .save("u1", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    env.registry.get_or_create("u1");
    env.wait_for_state("u1", SessionState::Open).await;

    env.transport
        .inject_close("u1", Some(close_code::STREAM_ERROR), "stream hiccup")
        .await;
    env.wait_for_state("u1", SessionState::Closed).await;

    // Gentle retry (2s default), then the credentialed reconnect opens
    for _ in 0..600 {
        if env.registry.get("u1").map(|s| s.state()) == Some(SessionState::Open) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        env.registry.get("u1").unwrap().state(),
        SessionState::Open
    );
}

// =============================================================================
// Liveness & recovery
// =============================================================================

#[tokio::test]
async fn test_probe_failures_force_reconnect_cycle() {
    let env = create_test_environment();
    env.store
        .save("u1", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    let session = env.registry.get_or_create("u1");
    env.wait_for_state("u1", SessionState::Open).await;

    // Silently dead socket: no close event, probes fail
    env.transport.set_probe_failing("u1", true);

    let probe_timeout = Duration::from_millis(200);
    assert_eq!(
        session.run_probe(probe_timeout, 3).await,
        ProbeOutcome::Failing(1)
    );
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(
        session.run_probe(probe_timeout, 3).await,
        ProbeOutcome::Failing(2)
    );
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(
        session.run_probe(probe_timeout, 3).await,
        ProbeOutcome::ForcedClose
    );
    assert_eq!(session.state(), SessionState::Closed);

    // The transient-classified retry reconnects on a fresh socket
    env.wait_for_state("u1", SessionState::Open).await;
}

#[tokio::test]
async fn test_sweeper_restores_closed_sessions() {
    let env = create_test_environment();
    env.store
        .save("u1", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    let session = env.registry.get_or_create("u1");
    env.wait_for_state("u1", SessionState::Open).await;

    // Simulate a lost timer: closed, credentials on disk, nothing pending
    session.disconnect(false).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.has_pending_retry());

    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let sweeper = RecoverySweeper::new(
        SweeperConfig::default(),
        env.registry.clone(),
        env.store.clone(),
        shutdown_rx,
    );
    sweeper.sweep_once().await;

    env.wait_for_state("u1", SessionState::Open).await;
}

// =============================================================================
// Multi-tenant isolation
// =============================================================================

#[tokio::test]
async fn test_many_tenants_connect_through_bounded_gate() {
    let env = create_test_environment();
    let tenants: Vec<String> = (0..10).map(|i| format!("tenant-{}", i)).collect();

    for tenant in &tenants {
        env.store
            .save(tenant, &Credentials::new(format!("tok-{}", tenant)))
            .await
            .unwrap();
        env.registry.get_or_create(tenant);
    }

    // Gate capacity is 2, but every tenant is eventually admitted and opens
    for tenant in &tenants {
        env.wait_for_state(tenant, SessionState::Open).await;
    }
    let counts = env.registry.counts();
    assert_eq!(counts.total_count, 10);
    assert_eq!(counts.active_count, 10);
}

#[tokio::test]
async fn test_one_tenant_failure_leaves_others_connected() {
    let env = create_test_environment();
    for tenant in ["u1", "u2"] {
        env.store
            .save(tenant, &Credentials::new("tok".to_string()))
            .await
            .unwrap();
        env.registry.get_or_create(tenant);
        env.wait_for_state(tenant, SessionState::Open).await;
    }

    env.transport
        .inject_close("u1", Some(close_code::LOGGED_OUT), "logged out")
        .await;
    let registry = env.registry.clone();
    env.wait_until(move || registry.get("u1").is_none()).await;

    // u2 is untouched
    let u2 = env.registry.get("u2").unwrap();
    assert_eq!(u2.state(), SessionState::Open);
    assert!(u2.send("+15553334444", "still here").await.is_ok());
}

#[tokio::test]
async fn test_disconnect_with_wipe_forgets_tenant() {
    let env = create_test_environment();
    env.store
        .save("u2", &Credentials::new("tok".to_string()))
        .await
        .unwrap();

    let session = env.registry.get_or_create("u2");
    env.wait_for_state("u2", SessionState::Open).await;

    let receipt = session.send("+15559990000", "hi").await.unwrap();
    assert!(!receipt.message_id.is_nil());

    session.disconnect(true).await.unwrap();
    assert!(env.registry.get("u2").is_none());
    assert!(!env.store.exists("u2").await);
}

// =============================================================================
// Application state wiring
// =============================================================================

#[tokio::test]
async fn test_app_state_builds_with_injected_components() {
    let settings = Settings {
        server: ServerConfig::default(),
        api: ApiConfig::default(),
        gate: GateConfig::default(),
        session: SessionConfig::default(),
        reconnect: ReconnectConfig::default(),
        heartbeat: HeartbeatConfig::default(),
        sweeper: SweeperConfig::default(),
        storage: StorageConfig::default(),
        transport: TransportConfig::default(),
    };

    let transport = Arc::new(MemoryTransport::new());
    let store = Arc::new(MemoryCredentialStore::new());
    let state = AppState::with_components(settings, transport, store);

    let counts = state.registry.counts();
    assert_eq!(counts.total_count, 0);
    assert_eq!(counts.active_count, 0);
}

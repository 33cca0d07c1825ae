use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

/// Bounds how many sessions may be establishing a connection at once.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_gate_capacity")]
    pub capacity: usize,
    /// Give up waiting for a slot after this long
    #[serde(default = "default_gate_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// QR artifact lifetime, independent of connection state
    #[serde(default = "default_qr_ttl")]
    pub qr_ttl_secs: u64,
    /// Bounded wait for a QR/pairing artifact before answering "pending"
    #[serde(default = "default_artifact_wait")]
    pub artifact_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Gentle retry delay (transient errors, challenge timeouts, auth retry)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay after a server-initiated termination
    #[serde(default = "default_server_close_delay_ms")]
    pub server_close_delay_ms: u64,
    /// Delay after a conflict (duplicate connection elsewhere)
    #[serde(default = "default_conflict_delay_ms")]
    pub conflict_delay_ms: u64,
    /// Exponential backoff parameters for the remaining retryable closes
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Probe interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Timeout for a single probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Consecutive failures before the connection is declared lost
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for per-tenant credential bundles
    #[serde(default = "default_storage_root")]
    pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Transport backend: "memory" (in-process simulator)
    #[serde(default = "default_transport_backend")]
    pub backend: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_gate_capacity() -> usize {
    2
}

fn default_gate_acquire_timeout() -> u64 {
    60
}

fn default_qr_ttl() -> u64 {
    60
}

fn default_artifact_wait() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_server_close_delay_ms() -> u64 {
    15_000
}

fn default_conflict_delay_ms() -> u64 {
    60_000
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.1
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

fn default_storage_root() -> String {
    "./sessions".to_string()
}

fn default_transport_backend() -> String {
    "memory".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("gate.capacity", 2)?
            .set_default("session.qr_ttl_secs", 60)?
            .set_default("heartbeat.interval_secs", 30)?
            .set_default("sweeper.interval_secs", 300)?
            .set_default("storage.root", "./sessions")?
            .set_default("transport.backend", "memory")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, GATE_CAPACITY, STORAGE_ROOT, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capacity: default_gate_capacity(),
            acquire_timeout_secs: default_gate_acquire_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            qr_ttl_secs: default_qr_ttl(),
            artifact_wait_secs: default_artifact_wait(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            server_close_delay_ms: default_server_close_delay_ms(),
            conflict_delay_ms: default_conflict_delay_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            probe_timeout_secs: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: default_transport_backend(),
        }
    }
}

mod settings;

pub use settings::{
    ApiConfig, GateConfig, HeartbeatConfig, ReconnectConfig, ServerConfig, SessionConfig,
    Settings, StorageConfig, SweeperConfig, TransportConfig,
};

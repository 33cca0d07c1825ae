mod health;
mod metrics;
mod routes;
mod sessions;

pub use health::health;
pub use metrics::metrics_handler;
pub use routes::session_routes;
pub use sessions::{
    disconnect_session, get_qr, get_status, list_sessions, reconnect_session, request_pairing,
    restore_session, send_message,
};

pub mod api;
pub mod config;
pub mod device_client;
pub mod http_client;
pub mod services;

// Re-exports from services for convenience
pub use services::reconnect::{
    ReconnectError, ReconnectMonitor, ReconnectOptions, ReconnectOutcome, SessionHandle,
    SessionSnapshot, SessionState, Started,
};

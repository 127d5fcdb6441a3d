//! Shared runtime state for rod-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The reconciled state
//! itself is owned by the session task; this module only holds its handle.

use rod_session::SessionHandle;
use serde::{Deserialize, Serialize};

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub build: BuildInfo,
    /// SHA-256 of the effective config, for support diagnostics.
    pub config_hash: String,
}

impl AppState {
    pub fn new(session: SessionHandle, config_hash: String) -> Self {
        Self {
            session,
            build: BuildInfo {
                service: "rod-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
        }
    }
}

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

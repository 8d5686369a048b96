//! Operational constants for the conversion service.
//!
//! Grouped by concern into zero-sized structs with associated consts so
//! call sites read as `EngineConfig::STARTUP_WAIT_BUDGET` rather than a
//! bare number.

use std::time::Duration;

/// Public listener defaults and limits.
pub struct ListenerConfig;

impl ListenerConfig {
    /// Default interface for the RPC listener.
    pub const DEFAULT_INTERFACE: &'static str = "127.0.0.1";

    /// Default port for the RPC listener.
    pub const DEFAULT_PORT: u16 = 2003;

    /// Maximum RPC frame size (100 MB). Documents travel inline, so this
    /// bounds the largest document the service will accept.
    pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

    /// Maximum simultaneous client connections.
    pub const MAX_CONNECTIONS: usize = 32;

    /// How long a shutting-down server waits for in-flight responses to
    /// flush before dropping the remaining connections.
    pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
}

/// Engine process supervision defaults.
pub struct EngineConfig;

impl EngineConfig {
    /// Default interface the engine control socket binds to.
    pub const DEFAULT_INTERFACE: &'static str = "127.0.0.1";

    /// Default port for the engine control socket.
    pub const DEFAULT_PORT: u16 = 2002;

    /// Executable names probed on PATH when none is given explicitly.
    pub const EXECUTABLE_CANDIDATES: &'static [&'static str] =
        &["soffice", "libreoffice", "ooffice"];

    /// Per-attempt connect timeout during the startup health check.
    pub const HEALTH_CHECK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Pause between startup health-check attempts.
    pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(250);

    /// Total time the engine gets to start listening before it is killed.
    pub const STARTUP_WAIT_BUDGET: Duration = Duration::from_secs(30);

    /// Grace period between SIGTERM and SIGKILL when terminating.
    pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);

    /// Connect timeout for the control-socket client.
    pub const CONTROL_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Client connection defaults.
pub struct ClientConfig;

impl ClientConfig {
    /// Default total connection attempts before giving up.
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    /// Fixed pause between connection attempts.
    pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

    /// Per-attempt TCP connect timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

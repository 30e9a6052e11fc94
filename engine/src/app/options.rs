//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::fsm::FsmSettings;
use crate::storage::settings::Settings;
use crate::workers::watchdog;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Directory of template files
    pub templates_dir: PathBuf,

    /// Enable the HTTP API
    pub enable_server: bool,

    /// Enable the stall watchdog
    pub enable_watchdog: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Watchdog worker options
    pub watchdog: watchdog::Options,

    /// Step execution settings
    pub fsm_settings: FsmSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            templates_dir: PathBuf::from("./templates"),
            enable_server: true,
            enable_watchdog: true,
            server: ServerOptions::default(),
            watchdog: watchdog::Options::default(),
            fsm_settings: FsmSettings::default(),
        }
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            templates_dir: PathBuf::from(&settings.templates_dir),
            enable_watchdog: settings.watchdog.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            watchdog: watchdog::Options {
                interval: Duration::from_secs(settings.watchdog.interval_secs),
                stall_timeout: Duration::from_secs(settings.watchdog.stall_timeout_secs),
            },
            fsm_settings: FsmSettings {
                step_timeout: Duration::from_secs(settings.executor.step_timeout_secs),
                max_attempts: settings.executor.max_attempts,
                retry_delay: Duration::from_millis(settings.executor.retry_delay_ms),
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including draining deployments
    pub max_shutdown_delay: Duration,

    /// Interval to check whether running deployments have stopped
    pub drain_poll_interval: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            drain_poll_interval: Duration::from_millis(200),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

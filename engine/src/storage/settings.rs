//! Settings file management

use std::collections::HashMap;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,

    /// HTTP API configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Step execution configuration
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Stall watchdog configuration
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Remote ERP configuration
    #[serde(default)]
    pub erp: ErpSettings,

    /// Directory holding `<template_id>.json` files
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_templates_dir() -> String {
    "./templates".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            executor: ExecutorSettings::default(),
            watchdog: WatchdogSettings::default(),
            erp: ErpSettings::default(),
            templates_dir: default_templates_dir(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Step execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    /// Upper bound for one remote call
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Attempts for idempotent steps
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_step_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Stall watchdog settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often active deployments are checked
    #[serde(default = "default_watchdog_interval")]
    pub interval_secs: u64,

    /// Deployments without progress for this long are failed
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_secs: u64,
}

fn default_watchdog_interval() -> u64 {
    30
}

fn default_stall_timeout() -> u64 {
    900
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_watchdog_interval(),
            stall_timeout_secs: default_stall_timeout(),
        }
    }
}

/// Remote ERP settings
#[derive(Debug, Deserialize)]
pub struct ErpSettings {
    /// Per-request timeout for the HTTP client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection details keyed by instance id
    #[serde(default)]
    pub instances: HashMap<String, InstanceSettings>,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ErpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            instances: HashMap::new(),
        }
    }
}

/// Connection details for one ERP instance
#[derive(Debug, Deserialize)]
pub struct InstanceSettings {
    pub base_url: String,

    /// Database name on multi-database servers
    #[serde(default)]
    pub database: Option<String>,

    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: SecretString,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

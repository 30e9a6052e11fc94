//! deployd - Entry Point
//!
//! Applies declarative ERP templates to remote instances and serves
//! deployment status, logs and metrics over HTTP.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::filesys::file::File;
use deployd::http::client::ErpHttpClient;
use deployd::logs::{init_logging, LogOptions};
use deployd::storage::settings::Settings;
use deployd::utils::version_info;

use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "./deployd.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let config_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let settings = match load_settings(&config_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {:#}", e);
            return;
        }
    };

    // Initialize logging; the guard must outlive the run loop
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from(&settings);
    let client = match ErpHttpClient::new(settings.erp) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid ERP settings: {e}");
            return;
        }
    };
    info!("Configured ERP instances: {:?}", client.instances());

    info!("Running deployd {} with options: {:?}", version.version, options);
    let result = run(options, Arc::new(client), await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run deployd: {e}");
    }
}

async fn load_settings(path: &PathBuf) -> anyhow::Result<Settings> {
    let settings = File::new(path)
        .read_json_opt::<Settings>()
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(settings.unwrap_or_default())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

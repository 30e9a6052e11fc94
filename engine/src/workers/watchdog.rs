//! Stall watchdog
//!
//! Fails active deployments whose record has not changed within the stall
//! timeout. A deployment with a running task is stopped at its next step
//! boundary; one without (an orphan) is failed on the spot.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::deploy::executor::DeploymentEngine;
use crate::errors::EngineError;

/// Watchdog worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between sweeps
    pub interval: Duration,

    /// Deployments unchanged for longer than this are failed
    pub stall_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(900),
        }
    }
}

/// Run the watchdog worker
pub async fn run<S, F>(
    options: &Options,
    engine: &DeploymentEngine,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Watchdog worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Watchdog worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match sweep(engine, options.stall_timeout).await {
            Ok(0) => debug!("No stalled deployments"),
            Ok(expired) => info!("Expired {} stalled deployment(s)", expired),
            Err(e) => error!("Watchdog sweep failed: {}", e),
        }
    }
}

/// Expire every stalled deployment once; returns how many were signalled
pub async fn sweep(engine: &DeploymentEngine, stall_timeout: Duration) -> Result<usize, EngineError> {
    let stall_timeout = chrono::Duration::from_std(stall_timeout)
        .map_err(|e| EngineError::ConfigError(format!("Invalid stall timeout: {}", e)))?;
    let now = Utc::now();

    let mut expired = 0;
    for deployment in engine.monitoring().get_active_deployments().await? {
        let idle = now - deployment.updated_at;
        if idle <= stall_timeout {
            continue;
        }

        warn!(
            "Deployment {} on {} made no progress for {}s",
            deployment.id,
            deployment.instance_id,
            idle.num_seconds()
        );
        match engine.expire(&deployment.id).await {
            Ok(_) => expired += 1,
            // Finished between the listing and now
            Err(EngineError::InvalidState(msg)) => debug!("{}", msg),
            Err(e) => error!("Failed to expire deployment {}: {}", deployment.id, e),
        }
    }
    Ok(expired)
}

//! Service lifecycle: start the engine, the watchdog and the API, then stop
//! them in order once the shutdown signal fires

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::deploy::remote::RemoteSystemClient;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::watchdog;

/// Run deployd until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    client: Arc<dyn RemoteSystemClient>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing deployd...");

    let (stop_tx, _) = broadcast::channel::<()>(1);
    let mut services = Services::new(stop_tx.clone(), options.lifecycle.clone());

    if let Err(e) = services.start(&options, client).await {
        error!("Failed to start deployd: {}", e);
        services.stop().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, stopping services...");
    drop(stop_tx);
    services.stop().await
}

/// Stop notification for a spawned service
fn stopped(mut stop_rx: broadcast::Receiver<()>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = stop_rx.recv().await;
    }
}

// ================================= SERVICES ====================================== //

struct Services {
    stop_tx: broadcast::Sender<()>,
    lifecycle: LifecycleOptions,
    state: Option<Arc<AppState>>,
    watchdog: Option<JoinHandle<()>>,
    server: Option<JoinHandle<Result<(), EngineError>>>,
}

impl Services {
    fn new(stop_tx: broadcast::Sender<()>, lifecycle: LifecycleOptions) -> Self {
        Self {
            stop_tx,
            lifecycle,
            state: None,
            watchdog: None,
            server: None,
        }
    }

    async fn start(
        &mut self,
        options: &AppOptions,
        client: Arc<dyn RemoteSystemClient>,
    ) -> Result<(), EngineError> {
        let templates_dir = Dir::new(&options.templates_dir);
        let state =
            Arc::new(AppState::init(&templates_dir, client, options.fsm_settings.clone()).await?);
        self.state = Some(state.clone());

        if options.enable_watchdog {
            info!("Starting watchdog worker...");
            let watchdog_options = options.watchdog.clone();
            let engine = state.engine.clone();
            let stop = stopped(self.stop_tx.subscribe());
            self.watchdog = Some(tokio::spawn(async move {
                watchdog::run(&watchdog_options, &engine, tokio::time::sleep, Box::pin(stop))
                    .await;
            }));
        }

        if options.enable_server {
            info!("Starting HTTP server...");
            let server_state = Arc::new(ServerState::new(state.engine.clone()));
            let stop = stopped(self.stop_tx.subscribe());
            self.server = Some(serve(&options.server, server_state, stop).await?);
        }

        Ok(())
    }

    /// Stop everything within the configured grace period; exits the process
    /// when the grace period runs out
    async fn stop(&mut self) -> Result<(), EngineError> {
        let _ = self.stop_tx.send(());

        let grace = self.lifecycle.max_shutdown_delay;
        match tokio::time::timeout(grace, self.stop_in_order()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Services still running after {:?}, exiting", grace);
                std::process::exit(1);
            }
        }
    }

    async fn stop_in_order(&mut self) -> Result<(), EngineError> {
        if let Some(handle) = self.watchdog.take() {
            if let Err(e) = handle.await {
                warn!("Watchdog worker ended abnormally: {}", e);
            }
        }

        // the API goes before the engine so no new submission races the drain
        if let Some(handle) = self.server.take() {
            handle
                .await
                .map_err(|e| EngineError::ShutdownError(e.to_string()))??;
        }

        if let Some(state) = self.state.take() {
            state.shutdown(self.lifecycle.drain_poll_interval).await?;
        }

        info!("deployd stopped");
        Ok(())
    }
}

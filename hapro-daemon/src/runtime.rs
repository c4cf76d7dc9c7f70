use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use hapro_client::{
    ClientCredentials, ClientError, CredentialCache, OutboundDispatcher, SupervisorClient,
};
use hapro_core::RelayConfig;

use crate::error::{io_err, DaemonError};
use crate::poller::CompletionTracker;
use crate::relay::{run_relay, RelaySettings, WsConnector};
use crate::server::{server_task, AppState};
use crate::watcher::watcher_task;

/// Start the relay and block the current thread until it exits.
pub fn start_blocking(config: RelayConfig) -> Result<(), DaemonError> {
    init_tracing(config.debug);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run watcher, subscription relay, and HTTP surface until ctrl-c or until
/// one of them fails.
pub async fn run(config: RelayConfig) -> Result<(), DaemonError> {
    let http = reqwest::Client::builder()
        .build()
        .map_err(ClientError::from)?;
    if config.supervisor_token.is_none() {
        warn!("SUPERVISOR_TOKEN is not set; supervisor and event bus calls will be rejected");
    }

    let supervisor = SupervisorClient::from_config(http.clone(), &config);
    let credentials = Arc::new(CredentialCache::new(ClientCredentials::new(
        http.clone(),
        &config,
    )));
    let dispatcher = Arc::new(OutboundDispatcher::new(http, &config, credentials));
    let tracker = CompletionTracker::new(
        Arc::new(supervisor.clone()),
        dispatcher.clone(),
        config.poll_interval(),
        config.archive_extension.clone(),
    );
    let state = Arc::new(AppState::new(config.clone(), supervisor));
    let relay_settings = RelaySettings {
        access_token: config.supervisor_token.clone().unwrap_or_default(),
        event_type: config.event_type.clone(),
        reconnect_delay: config.reconnect_delay(),
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let dir = config.backup_dir.clone();
        let extension = config.archive_extension.clone();
        let tracker = tracker.clone();
        tokio::spawn(async move {
            let result = watcher_task(dir, extension, tracker, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let relay_handle = {
        let shutdown = shutdown_tx.clone();
        let connector = WsConnector::new(config.event_bus_url.clone());
        let sink = dispatcher.clone();
        tokio::spawn(async move {
            let result = run_relay(connector, relay_settings, sink, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let server_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = server_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down relay");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, relay_result, server_result, signal_result) =
        tokio::join!(watcher_handle, relay_handle, server_handle, signal_handle);
    tracker.cancel_all();

    handle_join("watcher", watcher_result)?;
    handle_join("relay", relay_result)?;
    handle_join("http_server", server_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// `RUST_LOG` wins; otherwise `debug` in debug mode, else `info`.
pub fn init_tracing(debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

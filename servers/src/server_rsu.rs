//! # RSU Signal-Priority Relay
//!
//! Receives emergency-vehicle telemetry over HTTP or WebSocket, decides
//! whether the target signal should extend its green phase, records the
//! exchange in a JSON Lines audit trail, and pushes both the telemetry and
//! the decision to every connected dashboard.

use anyhow::Result;
use tokio::signal;

mod rsu_logic;
use rsu_logic::{config, downstream, logger, monitor, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!("Audit trail: {}", settings.audit_log_path.display());

    let app_state = state::AppState::build(&settings).await?;
    if app_state.geometry.has_source() {
        // A failure here is retried on the first /api/network request.
        if let Err(e) = app_state.geometry.load().await {
            log::warn!("Network geometry not available yet: {}", e);
        }
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let monitor_handle = tokio::spawn(monitor::run(
        settings.status_interval,
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let mut downstream_handle = tokio::spawn(downstream::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal, or for the server to die on its own
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
        result = &mut downstream_handle => {
            let _ = shutdown_tx.send(());
            let _ = monitor_handle.await;
            return result?;
        }
    }

    let _ = shutdown_tx.send(());

    let (served, _) = tokio::try_join!(downstream_handle, monitor_handle)?;
    served?;

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

use crate::rsu_logic::state::AppState;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

pub async fn run(status_interval: Duration, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut check_interval = interval(status_interval);
    // The first tick fires immediately; skip it so the first report has data.
    check_interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                let status = app_state.status();
                log::info!(
                    "Relay status: {} subscriber(s), {} accepted, {} rejected, {} decisions, {} audit failures",
                    status.subscribers,
                    status.relay.accepted,
                    status.relay.rejected,
                    status.relay.decisions,
                    status.relay.audit_failures
                );
                if status.relay.audit_failures > 0 {
                    log::warn!("Audit trail has {} failed write(s)", status.relay.audit_failures);
                }
            }
        }
    }
}

//! Periodic credential renewal, so a token is already fresh when the user
//! next acts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::CredentialManager;

/// Check (and if needed renew) the access credential every `interval`
/// until `cancel` fires. The first check runs immediately.
pub async fn run_keepalive(
    credentials: CredentialManager,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "credential keepalive started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("credential keepalive stopped");
                return;
            }
            _ = ticker.tick() => {
                match credentials.get_access_credential().await {
                    Ok(_) => debug!("keepalive: access credential valid"),
                    Err(e) => warn!(error = %e, "keepalive: credential renewal failed"),
                }
            }
        }
    }
}

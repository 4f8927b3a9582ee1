//! Background task expiring purchase requests that outlived their deadline.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::purchases::PurchaseService;

/// Spawns the expiry sweep, running every `interval` until the runtime shuts down.
///
/// The sweep is a conditional update, so several instances may run it concurrently.
pub fn spawn_expiry_sweeper(service: PurchaseService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match service.expire_pending_requests(Utc::now()).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::debug!(expired = ?expired, "Expiry sweep finished");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Expiry sweep failed");
                }
            }
        }
    })
}

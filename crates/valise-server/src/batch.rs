use std::time::Duration;

use tracing::{debug, info, warn};

use valise_api::state::AppState;

/// How long settled (SENT/FAILED) delivery entries stay queryable before
/// the ledger drops them and frees the correlation id.
const LEDGER_RETENTION: Duration = Duration::from_secs(600);

const LEDGER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that periodically drives unsent first-message
/// notifications through the dedup engine. Running alongside the cron
/// route is safe: the conditional claim serializes workers.
pub async fn run_notify_loop(state: AppState, interval_secs: u64, batch_limit: u32) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match state.engine.run_first_message_batch(batch_limit).await {
            Ok(summary) => {
                if summary.candidates > 0 {
                    info!(
                        "Notify batch: {} candidates, {} sent, {} skipped, {} errors",
                        summary.candidates, summary.sent, summary.skipped, summary.errors
                    );
                }
            }
            Err(e) => {
                warn!("Notify batch error: {}", e);
            }
        }
    }
}

/// Background task that caps the delivery ledger's memory. Without it a
/// long-lived process would keep one entry per correlated send forever.
pub async fn run_ledger_sweep_loop(state: AppState) {
    let mut interval = tokio::time::interval(LEDGER_SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        let evicted = state.ledger.evict_settled(LEDGER_RETENTION);
        if evicted > 0 {
            debug!("Delivery ledger sweep dropped {} settled entries", evicted);
        }
    }
}

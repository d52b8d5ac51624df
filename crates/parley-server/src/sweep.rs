use std::time::Duration;

use tracing::{info, warn};

use parley_api::SessionStore;

/// Background task that deletes expired sessions on a fixed interval.
pub async fn run_session_sweep(sessions: SessionStore, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match sessions.purge_expired().await {
            Ok(count) => {
                if count > 0 {
                    info!("Session sweep: removed {} expired sessions", count);
                }
            }
            Err(e) => {
                warn!("Session sweep error: {}", e);
            }
        }
    }
}

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::state::AppState;

/// How often expired session records are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop expired sessions so abandoned logins do not pile up
pub async fn run_cron(app_state: AppState) -> color_eyre::Result<()> {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        interval.tick().await;
        sweep_expired_sessions(&app_state).await;
    }
}

async fn sweep_expired_sessions(state: &AppState) -> usize {
    let removed = state.sessions.purge_expired(Utc::now()).await;

    if removed > 0 {
        info!(removed, "Purged expired sessions");
    } else {
        debug!("No expired sessions to purge");
    }

    removed
}

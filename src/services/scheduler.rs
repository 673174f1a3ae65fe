//! Daily background job for the overdue sweep

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::task::JoinHandle;

use super::overdue::OverdueSweeper;

/// Next occurrence of `at` (UTC time of day) strictly after `now`
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Run the overdue sweep every day at `at` (UTC)
///
/// A failed sweep is logged and retried at the next slot.
pub fn spawn_overdue_job(sweeper: OverdueSweeper, at: NaiveTime) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(at = %at, "Overdue loan check scheduled daily (UTC)");

        loop {
            let now = Utc::now();
            let next = next_run_after(now, at);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Waiting for next overdue check");
            tokio::time::sleep(wait).await;

            if let Err(e) = sweeper.check_overdue_loans().await {
                tracing::error!("Overdue loan check failed: {}", e);
            }
        }
    })
}

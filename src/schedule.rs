//! Weekly settlement trigger: every Friday at 02:00 UTC.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use tokio::sync::watch;
use tracing::{error, info};

use crate::engine::SettlementEngine;

const RUN_DAY: Weekday = Weekday::Fri;
const RUN_HOUR: i64 = 2;

/// The first scheduled run strictly after `after`.
pub fn next_weekly_run(after: DateTime<Utc>) -> DateTime<Utc> {
    let date = after.date_naive();
    let days_ahead =
        (RUN_DAY.num_days_from_monday() + 7 - date.weekday().num_days_from_monday()) % 7;
    let candidate = ((date + Duration::days(i64::from(days_ahead))).and_time(NaiveTime::default())
        + Duration::hours(RUN_HOUR))
    .and_utc();
    if candidate > after {
        candidate
    } else {
        candidate + Duration::weeks(1)
    }
}

/// Runs the weekly batch on schedule until `shutdown` flips. A run in progress
/// is never interrupted; shutdown is observed between runs.
pub async fn run_weekly_schedule(
    engine: Arc<SettlementEngine>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let next = next_weekly_run(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "weekly settlement scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                info!("weekly scheduler stopping");
                return;
            }
        }

        match engine.run_weekly().await {
            Ok(report) => info!(
                processed = report.processed,
                failed = report.failed,
                skipped = report.skipped,
                "scheduled settlement complete"
            ),
            Err(e) => error!(error = %e, "scheduled settlement could not run"),
        }
        if *shutdown.borrow() {
            return;
        }
    }
}

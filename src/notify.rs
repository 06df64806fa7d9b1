//! Payee notifications. Delivery is best-effort: the settlement engine spawns
//! sends and only logs their failures.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPayoutSummary {
    pub email: String,
    pub payee_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_amount_earned: Decimal,
    pub completed_referrals: u32,
    pub total_paid: Decimal,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_weekly_summary(&self, summary: WeeklyPayoutSummary) -> Result<(), NotifyError>;
}

/// The payout week runs from the most recent Monday through `today`.
pub fn payout_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let since_monday = today.weekday().num_days_from_monday();
    (today - Duration::days(i64::from(since_monday)), today)
}

/// Writes summaries to the log instead of sending mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_weekly_summary(&self, summary: WeeklyPayoutSummary) -> Result<(), NotifyError> {
        info!(
            email = %summary.email,
            payee = %summary.payee_name,
            start = %summary.start_date,
            end = %summary.end_date,
            total_paid = %summary.total_paid,
            "weekly payout summary"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_starts_on_monday() {
        let friday = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let (start, end) = payout_week(friday);
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 10, 12).unwrap());
        assert_eq!(end, friday);
    }

    #[test]
    fn monday_is_a_one_day_week() {
        let monday = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        assert_eq!(payout_week(monday), (monday, monday));
    }
}

use chrono::{DateTime, Utc};
use log::info;

use crate::models::ReportSettings;

/// Extracts the day count from a cycle string such as `"25 Days"`.
///
/// Uses the first run of ASCII digits found anywhere in the string.
pub fn days_from_cycle(cycle: &str) -> Option<u32> {
    let start = cycle.find(|c: char| c.is_ascii_digit())?;
    let digits: String = cycle[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Decides whether a report should be sent at `now`.
///
/// Fires one day before the advertised cycle is due so a failed run still has a day
/// to be retried. Dates are compared at UTC midnight.
pub fn should_send_report(settings: &ReportSettings, force_execution: bool, now: DateTime<Utc>) -> bool {
    if force_execution {
        return true;
    }

    let cycle = settings.cycle.as_deref().filter(|c| !c.trim().is_empty());

    match (cycle, settings.last_reported_at) {
        // first run ever, nothing to compare against
        (None, None) => true,
        (Some(cycle), Some(last_reported_at)) => match days_from_cycle(cycle) {
            Some(cycle_days) => {
                let elapsed = (now.date_naive() - last_reported_at.date_naive()).num_days();
                i64::from(cycle_days) - elapsed <= 1
            }
            None => {
                info!("Cycle {:?} carries no day count, skipping report", cycle);
                false
            }
        },
        (cycle, last_reported_at) => {
            info!(
                "Either cycle or lastReportedAt is missing: cycle={:?}, last_reported_at={:?}",
                cycle, last_reported_at
            );
            false
        }
    }
}

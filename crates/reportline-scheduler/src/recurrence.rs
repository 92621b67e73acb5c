use chrono::{DateTime, Days, Months, Utc};
use reportline_core::Frequency;

use crate::error::{Result, SchedulerError};

/// Compute the next UTC trigger time for `frequency` starting from `anchor`.
///
/// Daily and weekly steps keep the wall-clock time. Monthly and quarterly
/// steps advance the calendar month and clamp the day to the last day of the
/// target month (Jan 31 → Feb 28/29, never Mar 3).
///
/// Fails with [`SchedulerError::InvalidAnchor`] when the arithmetic overflows
/// chrono's range or the result is not strictly after `anchor`.
pub fn next_trigger(anchor: DateTime<Utc>, frequency: Frequency) -> Result<DateTime<Utc>> {
    let next = match frequency {
        Frequency::Daily => anchor.checked_add_days(Days::new(1)),
        Frequency::Weekly => anchor.checked_add_days(Days::new(7)),
        // checked_add_months clamps an overflowing day to the month's end.
        Frequency::Monthly => anchor.checked_add_months(Months::new(1)),
        Frequency::Quarterly => anchor.checked_add_months(Months::new(3)),
    };

    match next {
        Some(next) if next > anchor => Ok(next),
        _ => Err(SchedulerError::InvalidAnchor {
            anchor: anchor.to_rfc3339(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn daily_and_weekly_keep_wall_clock_time() {
        let anchor = at(2025, 3, 30, 9, 15);
        assert_eq!(next_trigger(anchor, Frequency::Daily).unwrap(), at(2025, 3, 31, 9, 15));
        assert_eq!(next_trigger(anchor, Frequency::Weekly).unwrap(), at(2025, 4, 6, 9, 15));
    }

    #[test]
    fn monthly_clamps_to_end_of_shorter_month() {
        assert_eq!(
            next_trigger(at(2025, 1, 31, 0, 0), Frequency::Monthly).unwrap(),
            at(2025, 2, 28, 0, 0)
        );
        assert_eq!(
            next_trigger(at(2024, 1, 31, 0, 0), Frequency::Monthly).unwrap(),
            at(2024, 2, 29, 0, 0)
        );
        assert_eq!(
            next_trigger(at(2025, 3, 31, 6, 0), Frequency::Monthly).unwrap(),
            at(2025, 4, 30, 6, 0)
        );
    }

    #[test]
    fn quarterly_steps_three_months_with_clamping() {
        assert_eq!(
            next_trigger(at(2025, 11, 30, 0, 0), Frequency::Quarterly).unwrap(),
            at(2026, 2, 28, 0, 0)
        );
        assert_eq!(
            next_trigger(at(2025, 1, 15, 12, 0), Frequency::Quarterly).unwrap(),
            at(2025, 4, 15, 12, 0)
        );
    }

    #[test]
    fn monthly_from_mid_month_matches_documented_example() {
        let created = at(2025, 1, 15, 0, 0);
        let first = next_trigger(created, Frequency::Monthly).unwrap();
        assert_eq!(first, at(2025, 2, 15, 0, 0));
        assert_eq!(next_trigger(first, Frequency::Monthly).unwrap(), at(2025, 3, 15, 0, 0));
    }

    #[test]
    fn overflow_at_end_of_time_is_invalid_anchor() {
        let err = next_trigger(DateTime::<Utc>::MAX_UTC, Frequency::Daily).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidAnchor { .. }));
    }
}

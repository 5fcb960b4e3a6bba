//! Week-aligned decomposition of date ranges and provider query building

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One inclusive window of at most seven days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Display label such as "Jan 1 – Jan 7"
    pub label: String,
}

impl WeekWindow {
    fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let label = format!("{} – {}", start.format("%b %-d"), end.format("%b %-d"));
        Self { start, end, label }
    }

    /// Number of calendar days covered, inclusive
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Provider query selecting messages dated within this window
    pub fn query(&self) -> String {
        date_query(self.start, next_day(self.end))
    }
}

/// Split `[start, end]` into consecutive seven-day windows
///
/// Windows begin at `start`; the last one is clipped to `end`.
pub fn weeks(start: NaiveDate, end: NaiveDate) -> Result<Vec<WeekWindow>, SyncError> {
    if start > end {
        return Err(SyncError::InvalidRange { start, end });
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    loop {
        let week_end = cursor
            .checked_add_days(Days::new(6))
            .map_or(end, |d| d.min(end));
        windows.push(WeekWindow::new(cursor, week_end));

        match week_end.checked_add_days(Days::new(1)) {
            Some(next) if week_end < end => cursor = next,
            _ => break,
        }
    }

    Ok(windows)
}

/// Query for messages dated on or after `after` and strictly before `before`
pub fn date_query(after: NaiveDate, before: NaiveDate) -> String {
    format!(
        "after:{} before:{}",
        after.format("%Y/%m/%d"),
        before.format("%Y/%m/%d")
    )
}

/// Query for messages newer than `watermark`, up to and including today
///
/// Gmail resolves date-only bounds in its own timezone, not UTC, so both
/// bounds are widened by a day. The upper bound is tomorrow since `before:`
/// is exclusive. Items re-listed from the day before the watermark are
/// absorbed by merge deduplication.
pub fn watermark_query(watermark: DateTime<Utc>, now: DateTime<Utc>) -> String {
    date_query(
        previous_day(watermark.date_naive()),
        next_day(now.date_naive()),
    )
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

fn previous_day(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_sixteen_days_gives_three_windows() {
        let windows = weeks(date(2025, 1, 1), date(2025, 1, 16)).unwrap();

        let days: Vec<i64> = windows.iter().map(WeekWindow::days).collect();
        assert_eq!(days, vec![7, 7, 2]);
        assert_eq!(windows[2].end, date(2025, 1, 16));
        assert_eq!(windows[0].label, "Jan 1 – Jan 7");
        assert_eq!(windows[2].label, "Jan 15 – Jan 16");
    }

    #[test]
    fn test_windows_cover_range_without_gaps_or_overlap() {
        let start = date(2024, 12, 20);
        for len in 0..60 {
            let end = start + chrono::Duration::days(len);
            let windows = weeks(start, end).unwrap();

            assert_eq!(windows.first().unwrap().start, start);
            assert_eq!(windows.last().unwrap().end, end);
            for pair in windows.windows(2) {
                assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
            }
            let covered: i64 = windows.iter().map(WeekWindow::days).sum();
            assert_eq!(covered, len + 1);
            assert!(windows.iter().all(|w| w.days() <= 7 && w.days() >= 1));
        }
    }

    #[test]
    fn test_single_day_range() {
        let windows = weeks(date(2025, 3, 9), date(2025, 3, 9)).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].days(), 1);
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let err = weeks(date(2025, 2, 1), date(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRange { .. }));
    }

    #[test]
    fn test_week_query_format() {
        let windows = weeks(date(2025, 1, 1), date(2025, 1, 16)).unwrap();
        assert_eq!(windows[0].query(), "after:2025/01/01 before:2025/01/08");
        assert_eq!(windows[2].query(), "after:2025/01/15 before:2025/01/17");
    }

    #[test]
    fn test_watermark_query_includes_today() {
        let watermark = Utc.with_ymd_and_hms(2025, 1, 30, 18, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 9, 0, 0).unwrap();
        assert_eq!(
            watermark_query(watermark, now),
            "after:2025/01/29 before:2025/02/04"
        );
    }

    #[test]
    fn test_watermark_query_covers_early_utc_hours_in_earlier_zones() {
        // 02:00 UTC on Mar 1 is still Feb 28 in Pacific time
        let watermark = Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        assert_eq!(
            watermark_query(watermark, now),
            "after:2025/02/28 before:2025/03/02"
        );
    }
}

//! Month-keyed partition documents

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::MailItem;

/// Partition key in `YYYY-MM` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey(String);

impl MonthKey {
    /// Build a key from a year and a 1-based month
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("Month out of range: {}", month);
        }
        Ok(Self(format!("{:04}-{:02}", year, month)))
    }

    /// Parse a `YYYY-MM` string
    pub fn parse(s: &str) -> Result<Self> {
        let (year, month) = s
            .split_once('-')
            .with_context(|| format!("Invalid month key: {}", s))?;
        if year.len() != 4 || month.len() != 2 {
            bail!("Invalid month key: {}", s);
        }
        let year: i32 = year
            .parse()
            .with_context(|| format!("Invalid year in month key: {}", s))?;
        let month: u32 = month
            .parse()
            .with_context(|| format!("Invalid month in month key: {}", s))?;
        Self::new(year, month)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", dt.year(), dt.month()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn year_month(&self) -> (i32, u32) {
        // Constructors guarantee the YYYY-MM shape
        let year = self.0[..4].parse().unwrap_or(1970);
        let month = self.0[5..].parse().unwrap_or(1);
        (year, month)
    }

    /// First and last calendar day of the month
    pub fn date_range(&self) -> DateRange {
        let (year, month) = self.year_month();
        let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(start);
        DateRange { start, end }
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.0
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One month of archived mail
///
/// `emails` is kept sorted ascending by resolved timestamp, undated items last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub date_range: DateRange,
    pub total_emails: usize,
    pub emails: Vec<MailItem>,
    /// Set when the partition is first written, preserved across merges
    pub export_date: DateTime<Utc>,
    /// Refreshed on every merge that changes the partition
    pub last_updated: DateTime<Utc>,
    /// Account that produced the partition
    pub account: String,
}

impl Partition {
    /// Create an empty partition for a month
    pub fn empty(month: &MonthKey, account: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            date_range: month.date_range(),
            total_emails: 0,
            emails: Vec::new(),
            export_date: now,
            last_updated: now,
            account: account.into(),
        }
    }

    /// Latest resolved timestamp among the partition's items
    pub fn most_recent_timestamp(&self) -> Option<DateTime<Utc>> {
        self.emails
            .iter()
            .filter_map(MailItem::resolved_timestamp)
            .max()
    }
}

/// Legacy flat archive: every item in one document, no month keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyArchive {
    pub emails: Vec<MailItem>,
    #[serde(default)]
    pub export_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub account: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_month_key_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2025, 2, 28, 23, 59, 59).unwrap();
        assert_eq!(MonthKey::from_datetime(dt).as_str(), "2025-02");
    }

    #[test]
    fn test_month_key_parse_rejects_garbage() {
        assert!(MonthKey::parse("2025-1").is_err());
        assert!(MonthKey::parse("2025-13").is_err());
        assert!(MonthKey::parse("emails").is_err());
        assert_eq!(MonthKey::parse("2024-12").unwrap().as_str(), "2024-12");
    }

    #[test]
    fn test_date_range_covers_whole_month() {
        let feb = MonthKey::new(2024, 2).unwrap().date_range();
        assert_eq!(feb.start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(feb.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let dec = MonthKey::new(2025, 12).unwrap().date_range();
        assert_eq!(dec.end, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn test_partition_serializes_camel_case() {
        let now = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
        let month = MonthKey::new(2025, 1).unwrap();
        let partition = Partition::empty(&month, "me@example.com", now);
        let json = serde_json::to_value(&partition).unwrap();

        assert_eq!(json["totalEmails"], 0);
        assert_eq!(json["dateRange"]["start"], "2025-01-01");
        assert_eq!(json["dateRange"]["end"], "2025-01-31");
        assert!(json.get("exportDate").is_some());
        assert!(json.get("lastUpdated").is_some());
    }
}

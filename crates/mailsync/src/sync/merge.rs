//! Month grouping and idempotent partition merge
//!
//! Identity is the item id alone. An incoming item whose id is already stored
//! is a duplicate and is discarded; the stored copy (and its `ignored` flag)
//! always wins. A merge with no new items leaves the partition untouched.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::models::{MailItem, MailItemId, MonthKey, Partition, sort_chronologically};
use crate::storage::{PartitionLocks, PartitionStore};

/// Items bucketed by the month of their resolved timestamp
#[derive(Debug, Default)]
pub struct MonthGroups {
    pub months: BTreeMap<MonthKey, Vec<MailItem>>,
    /// Items with no resolvable date, excluded from grouping
    pub undated: Vec<MailItemId>,
}

impl MonthGroups {
    pub fn item_count(&self) -> usize {
        self.months.values().map(Vec::len).sum()
    }
}

/// Bucket items by month, setting aside undated ones
pub fn group_by_month(items: Vec<MailItem>) -> MonthGroups {
    let mut groups = MonthGroups::default();
    for item in items {
        match item.month_key() {
            Some(month) => groups.months.entry(month).or_default().push(item),
            None => groups.undated.push(item.id),
        }
    }
    groups
}

/// New vs duplicate counts for one month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCounts {
    pub new_items: usize,
    pub duplicates: usize,
}

/// Outcome of merging into one partition
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub partition: Partition,
    pub counts: MergeCounts,
    /// Whether the partition differs from what was stored
    pub changed: bool,
}

/// Merge incoming items into a month's partition
///
/// `existing` absent means the month has no partition yet. The merged set is
/// re-sorted ascending by resolved timestamp, `export_date` is preserved,
/// and `last_updated` is set to `now` only when something was added.
pub fn merge_into_partition(
    existing: Option<Partition>,
    month: &MonthKey,
    incoming: Vec<MailItem>,
    account: &str,
    now: DateTime<Utc>,
) -> MergeResult {
    let mut partition = existing.unwrap_or_else(|| Partition::empty(month, account, now));

    let mut seen: HashSet<MailItemId> = partition.emails.iter().map(|e| e.id.clone()).collect();
    let mut counts = MergeCounts::default();
    let mut additions = Vec::new();

    for item in incoming {
        if seen.insert(item.id.clone()) {
            additions.push(item);
        } else {
            counts.duplicates += 1;
        }
    }
    counts.new_items = additions.len();

    if additions.is_empty() {
        return MergeResult {
            partition,
            counts,
            changed: false,
        };
    }

    partition.emails.extend(additions);
    sort_chronologically(&mut partition.emails);
    partition.total_emails = partition.emails.len();
    partition.last_updated = now;
    if partition.account.is_empty() {
        log::debug!("Partition {} had no account, assigning {}", month, account);
        partition.account = account.to_string();
    }

    MergeResult {
        partition,
        counts,
        changed: true,
    }
}

/// Read, merge, and write back one month under its partition lock
///
/// A partition created by this merge takes `export_date` when given, `now`
/// otherwise. The write is skipped when nothing new was added.
pub async fn merge_month(
    store: &dyn PartitionStore,
    locks: &PartitionLocks,
    month: &MonthKey,
    incoming: Vec<MailItem>,
    account: &str,
    now: DateTime<Utc>,
    export_date: Option<DateTime<Utc>>,
) -> Result<MergeCounts> {
    let _guard = locks.lock(month).await;

    let existing = store
        .read(month)
        .await
        .with_context(|| format!("Failed to read partition {}", month))?;

    let created = existing.is_none();
    let mut merged = merge_into_partition(existing, month, incoming, account, now);
    if created && let Some(export_date) = export_date {
        merged.partition.export_date = export_date;
    }
    if merged.changed {
        store
            .write(month, &merged.partition)
            .await
            .with_context(|| format!("Failed to write partition {}", month))?;
    }

    Ok(merged.counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryPartitionStore;
    use chrono::TimeZone;

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 10, 0, 0).unwrap()
    }

    fn item(id: &str, month: u32, day: u32) -> MailItem {
        MailItem::builder(id).date(at(month, day)).build()
    }

    fn jan() -> MonthKey {
        MonthKey::parse("2025-01").unwrap()
    }

    #[test]
    fn test_group_by_month_sets_aside_undated() {
        let undated = MailItem::builder("u").header("Date", "sometime").build();
        let header_dated = MailItem::builder("h")
            .header("date", "Sat, 1 Feb 2025 09:00:00 +0000")
            .build();

        let groups = group_by_month(vec![
            item("a", 1, 5),
            undated,
            item("b", 2, 3),
            header_dated,
            item("c", 1, 30),
        ]);

        assert_eq!(groups.months.len(), 2);
        assert_eq!(groups.months[&jan()].len(), 2);
        assert_eq!(groups.months[&MonthKey::parse("2025-02").unwrap()].len(), 2);
        assert_eq!(groups.undated, vec![MailItemId::new("u")]);
        assert_eq!(groups.item_count(), 4);
    }

    #[test]
    fn test_merge_into_empty_partition() {
        let now = at(2, 1);
        let merged = merge_into_partition(
            None,
            &jan(),
            vec![item("b", 1, 20), item("a", 1, 2)],
            "me@example.com",
            now,
        );

        assert!(merged.changed);
        assert_eq!(merged.counts, MergeCounts { new_items: 2, duplicates: 0 });
        let p = merged.partition;
        assert_eq!(p.total_emails, 2);
        assert_eq!(p.emails[0].id.as_str(), "a");
        assert_eq!(p.export_date, now);
        assert_eq!(p.last_updated, now);
        assert_eq!(p.account, "me@example.com");
        assert_eq!(p.date_range.end.to_string(), "2025-01-31");
    }

    #[test]
    fn test_stored_item_wins_on_duplicate() {
        let created = at(1, 31);
        let mut stored = item("a", 1, 5);
        stored.ignored = true;
        let existing = merge_into_partition(None, &jan(), vec![stored], "me", created).partition;

        let incoming = MailItem::builder("a")
            .date(at(1, 5))
            .subject("changed upstream")
            .build();
        let later = at(2, 10);
        let merged =
            merge_into_partition(Some(existing.clone()), &jan(), vec![incoming, item("b", 1, 3)], "me", later);

        assert_eq!(merged.counts, MergeCounts { new_items: 1, duplicates: 1 });
        let p = merged.partition;
        assert_eq!(p.total_emails, 2);
        assert_eq!(p.emails[0].id.as_str(), "b");
        assert!(p.emails[1].ignored);
        assert_eq!(p.emails[1].subject, "");
        assert_eq!(p.export_date, created);
        assert_eq!(p.last_updated, later);
    }

    #[test]
    fn test_duplicates_within_incoming_batch() {
        let merged = merge_into_partition(
            None,
            &jan(),
            vec![item("a", 1, 5), item("a", 1, 5)],
            "me",
            at(2, 1),
        );
        assert_eq!(merged.counts, MergeCounts { new_items: 1, duplicates: 1 });
        assert_eq!(merged.partition.total_emails, 1);
    }

    #[test]
    fn test_all_duplicates_leaves_partition_unchanged() {
        let existing =
            merge_into_partition(None, &jan(), vec![item("a", 1, 5)], "me", at(1, 31)).partition;

        let merged =
            merge_into_partition(Some(existing.clone()), &jan(), vec![item("a", 1, 5)], "me", at(3, 1));

        assert!(!merged.changed);
        assert_eq!(merged.partition, existing);
    }

    #[test]
    fn test_undated_items_sort_last_in_stable_order() {
        let existing = Partition {
            emails: vec![MailItem::builder("u1").build()],
            total_emails: 1,
            ..Partition::empty(&jan(), "me", at(1, 1))
        };
        let merged = merge_into_partition(
            Some(existing),
            &jan(),
            vec![item("late", 1, 20), item("early", 1, 2)],
            "me",
            at(2, 1),
        );
        let ids: Vec<&str> = merged.partition.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late", "u1"]);
    }

    #[tokio::test]
    async fn test_merge_month_skips_write_without_new_items() {
        let store = InMemoryPartitionStore::new();
        let locks = PartitionLocks::new();

        let first = merge_month(&store, &locks, &jan(), vec![item("a", 1, 5)], "me", at(2, 1), None)
            .await
            .unwrap();
        assert_eq!(first.new_items, 1);
        assert_eq!(store.write_count(), 1);

        let second = merge_month(&store, &locks, &jan(), vec![item("a", 1, 5)], "me", at(2, 2), None)
            .await
            .unwrap();
        assert_eq!(second, MergeCounts { new_items: 0, duplicates: 1 });
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_month_propagates_write_failure() {
        let store = InMemoryPartitionStore::new();
        store.fail_writes_for(jan());

        let err = merge_month(&store, &PartitionLocks::new(), &jan(), vec![item("a", 1, 5)], "me", at(2, 1), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("2025-01"));
    }
}

//! Smart Fetch: incremental sync into month partitions
//!
//! Phases run `Idle -> Scanning -> Fetching -> Grouping -> Merging -> Idle`,
//! or end in `Failed` when a top-level step cannot proceed. Authentication
//! failures abort before any partition is touched. A failed month write is
//! reported for that month only; the remaining months still merge.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::merge::{MergeCounts, group_by_month, merge_month};
use super::{LogEntry, SyncLog};
use crate::config::SyncConfig;
use crate::error::{ErrorKind, Issue, SyncError};
use crate::fetch::{BatchFetcher, RetryPolicy, split_outcomes, watermark_query};
use crate::models::{MailItem, Mailbox, MonthKey};
use crate::provider::MailProvider;
use crate::storage::{PartitionLocks, PartitionStore};

/// Where a Smart Fetch run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Scanning,
    Fetching,
    Grouping,
    Merging,
    Failed,
}

/// Merge outcome for one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthMergeOutcome {
    pub month: MonthKey,
    pub new_items: usize,
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a Smart Fetch run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartFetchReport {
    /// True when every top-level step succeeded, even if some units failed
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncErrorReport>,
    /// Lower bound used for the fetch
    pub watermark: Option<DateTime<Utc>>,
    pub fetched: usize,
    pub failed: usize,
    pub new_items: usize,
    pub duplicates: usize,
    pub skipped_undated: usize,
    pub months: Vec<MonthMergeOutcome>,
    /// Units that failed without aborting the run
    pub issues: Vec<Issue>,
    /// Watermark from the re-scan after merging
    pub watermark_after: Option<DateTime<Utc>>,
    pub phases: Vec<SyncPhase>,
    pub duration_ms: u64,
    pub logs: Vec<LogEntry>,
}

/// Serializable form of a fatal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub requires_sign_in: bool,
}

impl From<&SyncError> for SyncErrorReport {
    fn from(e: &SyncError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            requires_sign_in: e.kind() == ErrorKind::Authentication
                || *e == SyncError::no_session(),
        }
    }
}

impl SmartFetchReport {
    fn new() -> Self {
        Self {
            success: false,
            error: None,
            watermark: None,
            fetched: 0,
            failed: 0,
            new_items: 0,
            duplicates: 0,
            skipped_undated: 0,
            months: Vec::new(),
            issues: Vec::new(),
            watermark_after: None,
            phases: vec![SyncPhase::Idle],
            duration_ms: 0,
            logs: Vec::new(),
        }
    }

    /// A report for a run refused before it started
    pub fn refused(error: &SyncError, log: &SyncLog) -> Self {
        log.error(error.to_string());
        let mut report = Self::new();
        report.error = Some(error.into());
        report.phases.push(SyncPhase::Failed);
        report.phases.push(SyncPhase::Idle);
        report.logs = log.entries();
        report
    }
}

/// Incremental sync engine
pub struct SmartFetch {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn PartitionStore>,
    locks: Arc<PartitionLocks>,
    config: SyncConfig,
    phase: Mutex<SyncPhase>,
}

impl SmartFetch {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn PartitionStore>,
        locks: Arc<PartitionLocks>,
        config: SyncConfig,
    ) -> Self {
        Self {
            provider,
            store,
            locks,
            config,
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or(SyncPhase::Idle)
    }

    fn enter(&self, phase: SyncPhase, report: &mut SmartFetchReport) {
        log::debug!("Smart Fetch phase: {:?}", phase);
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
        report.phases.push(phase);
    }

    pub async fn run(&self, mailbox: &Mailbox, log: &SyncLog) -> SmartFetchReport {
        self.run_at(mailbox, log, Utc::now()).await
    }

    /// Run once, treating `now` as the current time
    pub async fn run_at(&self, mailbox: &Mailbox, log: &SyncLog, now: DateTime<Utc>) -> SmartFetchReport {
        let start = Instant::now();
        let mut report = SmartFetchReport::new();

        if let Err(e) = self.execute(mailbox, log, now, &mut report).await {
            log.error(e.to_string());
            report.error = Some((&e).into());
            self.enter(SyncPhase::Failed, &mut report);
        } else {
            report.success = true;
        }

        self.enter(SyncPhase::Idle, &mut report);
        report.duration_ms = start.elapsed().as_millis() as u64;
        report.logs = log.entries();
        report
    }

    async fn execute(
        &self,
        mailbox: &Mailbox,
        log: &SyncLog,
        now: DateTime<Utc>,
        report: &mut SmartFetchReport,
    ) -> Result<(), SyncError> {
        log.info(format!("Starting Smart Fetch for {}", mailbox.account_id));

        // 1. Scan for the watermark
        self.enter(SyncPhase::Scanning, report);
        let scan = self.store.scan().await.map_err(|e| SyncError::Storage {
            message: format!("{:#}", e),
        })?;
        if scan.legacy_detected {
            return Err(SyncError::MigrationRequired);
        }

        let watermark = match scan.most_recent_item_timestamp {
            Some(latest) => {
                log.info(format!(
                    "Watermark: {} ({} partitions)",
                    latest.to_rfc3339(),
                    scan.partition_count
                ));
                latest
            }
            None => {
                let lookback = now - Duration::days(self.config.default_lookback_days);
                log.info(format!(
                    "No archived emails, looking back {} days to {}",
                    self.config.default_lookback_days,
                    lookback.date_naive()
                ));
                lookback
            }
        };
        report.watermark = Some(watermark);

        // 2. Fetch everything newer than the watermark
        self.enter(SyncPhase::Fetching, report);
        let items = self.fetch_since(mailbox, watermark, now, log, report).await?;

        // 3. Group by month
        self.enter(SyncPhase::Grouping, report);
        let groups = group_by_month(items);
        for id in &groups.undated {
            log.warning(format!("Skipping email {}: no resolvable date", id));
            report
                .issues
                .push(Issue::new(ErrorKind::DataShape, id, "no resolvable date"));
        }
        report.skipped_undated = groups.undated.len();

        // 4. Merge each month under its lock
        self.enter(SyncPhase::Merging, report);
        if !groups.months.is_empty() {
            log.info(format!(
                "Merging {} emails into {} month(s)",
                groups.item_count(),
                groups.months.len()
            ));
        }
        for (month, month_items) in groups.months {
            let outcome = self.merge(&month, month_items, &mailbox.account_id, now, log).await;
            if let Some(error) = &outcome.error {
                report
                    .issues
                    .push(Issue::new(ErrorKind::Partial, &outcome.month, error.clone()));
            }
            report.new_items += outcome.new_items;
            report.duplicates += outcome.duplicates;
            report.months.push(outcome);
        }

        // 5. Re-scan so the new watermark is visible immediately
        match self.store.scan().await {
            Ok(after) => report.watermark_after = after.most_recent_item_timestamp,
            Err(e) => log.warning(format!("Re-scan after merge failed: {:#}", e)),
        }

        let failed_months = report.months.iter().filter(|m| m.error.is_some()).count();
        let summary = format!(
            "Smart Fetch complete: {} new, {} duplicates, {} failed, {} skipped without date",
            report.new_items, report.duplicates, report.failed, report.skipped_undated
        );
        if failed_months > 0 {
            log.warning(format!("{} ({} month write(s) failed)", summary, failed_months));
        } else {
            log.success(summary);
        }

        Ok(())
    }

    async fn fetch_since(
        &self,
        mailbox: &Mailbox,
        watermark: DateTime<Utc>,
        now: DateTime<Utc>,
        log: &SyncLog,
        report: &mut SmartFetchReport,
    ) -> Result<Vec<MailItem>, SyncError> {
        let query = watermark_query(watermark, now);
        let ids = self
            .provider
            .list_message_ids(mailbox, &query, self.config.list_page_size)
            .await
            .map_err(|e| SyncError::from_remote(&e))?;

        log.info(format!("Found {} emails matching {}", ids.len(), query));
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let fetcher = BatchFetcher::new(Arc::clone(&self.provider), mailbox.clone())
            .with_retry(RetryPolicy::from_config(&self.config));
        let outcomes = fetcher
            .fetch_all_with_progress(
                &ids,
                self.config.sync_batch_size,
                self.config.sync_batch_delay(),
                |p| {
                    log.info(format!(
                        "Batch {}/{}: {}/{} processed ({}%)",
                        p.batch,
                        p.total_batches,
                        p.processed,
                        p.total,
                        p.percent()
                    ))
                },
            )
            .await;

        let (items, failures) = split_outcomes(outcomes);
        if let Some(rejected) = failures.iter().find(|f| f.kind.is_fatal()) {
            return Err(SyncError::Authentication {
                message: rejected.message.clone(),
            });
        }

        report.fetched = items.len();
        report.failed = failures.len();
        report.issues.extend(
            failures
                .iter()
                .map(|f| Issue::new(f.kind, &f.id, f.message.clone())),
        );
        if failures.is_empty() {
            log.success(format!("Fetched {} emails", items.len()));
        } else {
            log.warning(format!(
                "Fetched {} emails, {} could not be retrieved",
                items.len(),
                failures.len()
            ));
        }

        Ok(items)
    }

    async fn merge(
        &self,
        month: &MonthKey,
        items: Vec<MailItem>,
        account: &str,
        now: DateTime<Utc>,
        log: &SyncLog,
    ) -> MonthMergeOutcome {
        let incoming = items.len();
        match merge_month(self.store.as_ref(), &self.locks, month, items, account, now, None).await {
            Ok(MergeCounts { new_items, duplicates }) => {
                log.success(format!(
                    "{}: {} new, {} duplicates",
                    month, new_items, duplicates
                ));
                MonthMergeOutcome {
                    month: month.clone(),
                    new_items,
                    duplicates,
                    error: None,
                }
            }
            Err(e) => {
                log.error(format!("{}: merge of {} emails failed: {:#}", month, incoming, e));
                MonthMergeOutcome {
                    month: month.clone(),
                    new_items: 0,
                    duplicates: 0,
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::provider::InMemoryProvider;
    use crate::storage::InMemoryPartitionStore;
    use chrono::TimeZone;

    struct Fixture {
        provider: Arc<InMemoryProvider>,
        store: Arc<InMemoryPartitionStore>,
        engine: SmartFetch,
    }

    fn fixture() -> Fixture {
        fixture_with(SyncConfig::default())
    }

    fn fixture_with(config: SyncConfig) -> Fixture {
        let provider = Arc::new(InMemoryProvider::new(UserProfile::new("me@example.com")));
        let store = Arc::new(InMemoryPartitionStore::new());
        let engine = SmartFetch::new(
            provider.clone(),
            store.clone(),
            Arc::new(PartitionLocks::new()),
            config,
        );
        Fixture {
            provider,
            store,
            engine,
        }
    }

    fn mailbox() -> Mailbox {
        Mailbox::new("me@example.com", "token")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap()
    }

    fn item(id: &str, month: u32, day: u32) -> MailItem {
        MailItem::builder(id)
            .date(Utc.with_ymd_and_hms(2025, month, day, 9, 0, 0).unwrap())
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_on_success() {
        let f = fixture();
        f.provider.add_item(item("a", 2, 1));

        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(report.success);
        assert_eq!(
            report.phases,
            vec![
                SyncPhase::Idle,
                SyncPhase::Scanning,
                SyncPhase::Fetching,
                SyncPhase::Grouping,
                SyncPhase::Merging,
                SyncPhase::Idle,
            ]
        );
        assert_eq!(f.engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_lookback_when_store_empty() {
        let f = fixture();
        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(report.success);
        assert_eq!(report.watermark, Some(now() - Duration::days(30)));
        assert_eq!(f.provider.queries(), vec!["after:2025/01/10 before:2025/02/11"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watermark_from_latest_partition_item() {
        let f = fixture();
        f.provider.add_item(item("a", 1, 20));
        f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        f.provider.add_item(item("b", 2, 5));
        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert_eq!(
            report.watermark,
            Some(Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0).unwrap())
        );
        assert_eq!(f.provider.queries()[1], "after:2025/01/19 before:2025/02/11");
        assert_eq!(report.new_items, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(
            report.watermark_after,
            Some(Utc.with_ymd_and_hms(2025, 2, 5, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_larger_than_listing_page_is_fully_fetched() {
        let f = fixture_with(SyncConfig {
            list_page_size: 3,
            ..SyncConfig::default()
        });
        for day in 1..=5 {
            f.provider.add_item(item(&format!("m{}", day), 2, day));
        }

        let first = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;
        let second = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(first.success);
        assert_eq!(first.fetched, 5);
        assert_eq!(first.new_items, 5);
        assert_eq!(second.new_items, 0);

        let stored: Vec<String> = f
            .store
            .partition(&MonthKey::parse("2025-02").unwrap())
            .unwrap()
            .emails
            .iter()
            .map(|e| e.id.as_str().to_string())
            .collect();
        assert_eq!(stored, vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_aborts_before_merge() {
        let f = fixture();
        f.provider.add_item(item("a", 2, 1));
        f.provider.set_reject_auth(true);

        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(!report.success);
        let error = report.error.unwrap();
        assert!(error.requires_sign_in);
        assert_eq!(error.kind, ErrorKind::Authentication);
        assert!(error.message.contains("Sign in again"));
        assert_eq!(*report.phases.last().unwrap(), SyncPhase::Idle);
        assert!(report.phases.contains(&SyncPhase::Failed));
        assert!(!report.phases.contains(&SyncPhase::Merging));
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_month_does_not_block_others() {
        let f = fixture();
        f.provider.add_item(item("a", 1, 25));
        f.provider.add_item(item("b", 2, 3));
        f.store.fail_writes_for(MonthKey::parse("2025-01").unwrap());
        let log = SyncLog::new();

        let report = f.engine.run_at(&mailbox(), &log, now()).await;

        assert!(report.success);
        assert_eq!(report.months.len(), 2);
        assert!(report.months[0].error.is_some());
        assert!(report.months[1].error.is_none());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, ErrorKind::Partial);
        assert_eq!(report.issues[0].subject, "2025-01");
        assert_eq!(report.new_items, 1);
        assert!(f.store.partition(&MonthKey::parse("2025-02").unwrap()).is_some());
        assert!(report
            .logs
            .iter()
            .any(|e| e.level == crate::sync::LogLevel::Error && e.message.starts_with("2025-01")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undated_items_are_skipped_with_warning() {
        let f = fixture();
        f.provider.add_item(item("a", 2, 1));
        f.provider.add_item_listed_at(
            MailItem::builder("nodate").build(),
            Utc.with_ymd_and_hms(2025, 2, 2, 0, 0, 0).unwrap(),
        );

        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped_undated, 1);
        assert_eq!(report.new_items, 1);
        assert_eq!(
            report.issues,
            vec![Issue::new(ErrorKind::DataShape, "nodate", "no resolvable date")]
        );
        assert!(report
            .logs
            .iter()
            .any(|e| e.level == crate::sync::LogLevel::Warning && e.message.contains("nodate")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetches_are_counted_not_fatal() {
        let f = fixture();
        f.provider.add_item(item("a", 2, 1));
        f.provider.add_item(item("b", 2, 2));
        f.provider.fail_message("b");

        let report = f.engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(report.success);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.new_items, 1);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, ErrorKind::Transient);
        assert_eq!(report.issues[0].subject, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refuses_while_legacy_archive_present() {
        let provider = Arc::new(InMemoryProvider::new(UserProfile::new("me@example.com")));
        let store = Arc::new(InMemoryPartitionStore::with_legacy(crate::models::LegacyArchive {
            emails: vec![item("old", 1, 1)],
            export_date: None,
            account: None,
        }));
        let engine = SmartFetch::new(
            provider.clone(),
            store,
            Arc::new(PartitionLocks::new()),
            SyncConfig::default(),
        );

        let report = engine.run_at(&mailbox(), &SyncLog::new(), now()).await;

        assert!(!report.success);
        assert!(provider.queries().is_empty());
        assert!(report.error.unwrap().message.contains("migrated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_stream_covers_run() {
        let f = fixture();
        for i in 0..12 {
            f.provider.add_item(item(&format!("m{}", i), 2, 1 + i % 5));
        }
        let log = SyncLog::new();

        let report = f.engine.run_at(&mailbox(), &log, now()).await;

        let messages: Vec<&str> = report.logs.iter().map(|e| e.message.as_str()).collect();
        assert!(messages[0].starts_with("Starting Smart Fetch"));
        assert!(messages.iter().any(|m| m.starts_with("No archived emails")));
        assert_eq!(messages.iter().filter(|m| m.starts_with("Batch ")).count(), 2);
        assert!(messages.iter().any(|m| m.starts_with("2025-02: 12 new, 0 duplicates")));
        assert!(messages.last().unwrap().starts_with("Smart Fetch complete: 12 new"));
    }
}

//! Legacy flat archive to month partitions
//!
//! Items are regrouped by resolved month and merged into partitions with the
//! same merge used by Smart Fetch, so a re-run after a partial failure never
//! duplicates anything. The legacy archive is retired only once every month
//! has been written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::merge::{group_by_month, merge_month};
use super::{LogEntry, SyncLog};
use crate::error::{ErrorKind, Issue};
use crate::storage::{PartitionLocks, PartitionStore};

/// Everything a migration run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    /// False when the store held no legacy archive
    pub needed: bool,
    pub migrated_months: usize,
    /// Items newly written into partitions
    pub migrated_items: usize,
    pub skipped_undated: usize,
    pub failed_months: usize,
    /// Undated items and failed months
    pub issues: Vec<Issue>,
    pub logs: Vec<LogEntry>,
}

pub struct MigrationTool {
    store: Arc<dyn PartitionStore>,
    locks: Arc<PartitionLocks>,
}

impl MigrationTool {
    pub fn new(store: Arc<dyn PartitionStore>, locks: Arc<PartitionLocks>) -> Self {
        Self { store, locks }
    }

    /// Migrate if a legacy archive is present
    ///
    /// `account` is recorded on new partitions when the archive names none.
    pub async fn migrate(&self, account: &str, log: &SyncLog) -> MigrationReport {
        self.migrate_at(account, log, Utc::now()).await
    }

    pub async fn migrate_at(&self, account: &str, log: &SyncLog, now: DateTime<Utc>) -> MigrationReport {
        let mut report = MigrationReport {
            success: false,
            needed: false,
            migrated_months: 0,
            migrated_items: 0,
            skipped_undated: 0,
            failed_months: 0,
            issues: Vec::new(),
            logs: Vec::new(),
        };

        report.success = self.run(account, log, now, &mut report).await;
        report.logs = log.entries();
        report
    }

    async fn run(
        &self,
        account: &str,
        log: &SyncLog,
        now: DateTime<Utc>,
        report: &mut MigrationReport,
    ) -> bool {
        log.info("Checking archive layout");
        let scan = match self.store.scan().await {
            Ok(scan) => scan,
            Err(e) => {
                log.error(format!("Failed to scan archive: {:#}", e));
                return false;
            }
        };

        if !scan.legacy_detected {
            log.success("No migration needed");
            return true;
        }

        let archive = match self.store.read_legacy().await {
            Ok(Some(archive)) => archive,
            Ok(None) => {
                log.success("No migration needed");
                return true;
            }
            Err(e) => {
                log.error(format!("Failed to read legacy archive: {:#}", e));
                report.needed = true;
                return false;
            }
        };
        report.needed = true;

        let account = archive.account.as_deref().unwrap_or(account).to_string();
        let export_date = archive.export_date;
        log.info(format!(
            "Legacy archive found with {} emails",
            archive.emails.len()
        ));

        let groups = group_by_month(archive.emails);
        for id in &groups.undated {
            log.warning(format!("Skipping email {}: no resolvable date", id));
            report
                .issues
                .push(Issue::new(ErrorKind::DataShape, id, "no resolvable date"));
        }
        report.skipped_undated = groups.undated.len();

        log.info(format!("Regrouping into {} month(s)", groups.months.len()));
        for (month, items) in groups.months {
            let count = items.len();
            let merged = merge_month(
                self.store.as_ref(),
                &self.locks,
                &month,
                items,
                &account,
                now,
                export_date,
            )
            .await;
            match merged {
                Ok(counts) => {
                    report.migrated_months += 1;
                    report.migrated_items += counts.new_items;
                    log.success(format!(
                        "{}: wrote {} emails ({} already present)",
                        month, counts.new_items, counts.duplicates
                    ));
                }
                Err(e) => {
                    report.failed_months += 1;
                    log.error(format!("{}: failed to migrate {} emails: {:#}", month, count, e));
                    report
                        .issues
                        .push(Issue::new(ErrorKind::Partial, &month, format!("{:#}", e)));
                }
            }
        }

        if report.failed_months > 0 {
            log.error(format!(
                "Migration incomplete: {} month(s) failed, legacy archive kept. Run again to retry",
                report.failed_months
            ));
            return false;
        }

        if let Err(e) = self.store.retire_legacy().await {
            log.error(format!("Failed to retire legacy archive: {:#}", e));
            return false;
        }

        log.success(format!(
            "Migration complete: {} emails in {} month(s)",
            report.migrated_items, report.migrated_months
        ));
        true
    }
}

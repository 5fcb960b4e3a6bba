//! Bulk export of a date range, one week at a time
//!
//! Weeks are processed in order. A week whose listing or fetching fails is
//! logged, marked failed, and skipped; the export always moves on to the
//! next week. Only an authentication rejection aborts the whole export.
//! Persisting the result is the caller's concern.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::batch::{BatchFetcher, split_outcomes};
use super::range::{WeekWindow, weeks};
use super::RetryPolicy;
use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncError};
use crate::models::{MailItem, Mailbox};
use crate::provider::MailProvider;
use crate::sync::SyncLog;

/// State of one week in the progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot delivered to the progress callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportProgress {
    pub week_label: String,
    /// Percent of the current week's messages processed
    pub week_percent: u8,
    pub weeks_completed: usize,
    pub weeks_total: usize,
    /// Message ids listed so far across all weeks
    pub emails_found: usize,
    /// Messages with a fetch outcome so far across all weeks
    pub emails_processed: usize,
    pub status: WeekStatus,
}

/// Per-week line of the export result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekSummary {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub emails: usize,
    pub failed_fetches: usize,
    pub status: WeekStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated export, ready for serialization by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub exported_at: DateTime<Utc>,
    pub account: String,
    pub emails: Vec<MailItem>,
    pub weekly_breakdown: Vec<WeekSummary>,
    pub total_emails: usize,
    pub failed_weeks: usize,
}

/// Runs weekly exports against a provider
pub struct WeeklyExporter {
    provider: Arc<dyn MailProvider>,
    mailbox: Mailbox,
    batch_size: usize,
    batch_delay: Duration,
    success_delay: Duration,
    failure_delay: Duration,
    page_size: usize,
    retry: RetryPolicy,
}

impl WeeklyExporter {
    pub fn new(provider: Arc<dyn MailProvider>, mailbox: Mailbox, config: &SyncConfig) -> Self {
        Self {
            provider,
            mailbox,
            batch_size: config.export_batch_size,
            batch_delay: config.export_batch_delay(),
            success_delay: Duration::from_millis(config.week_success_delay_ms),
            failure_delay: Duration::from_millis(config.week_failure_delay_ms),
            page_size: config.list_page_size,
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Export every message dated within `[start, end]`
    pub async fn export<F>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        log: &SyncLog,
        mut on_progress: F,
    ) -> Result<ExportResult, SyncError>
    where
        F: FnMut(&ExportProgress),
    {
        let windows = weeks(start, end)?;
        let fetcher = BatchFetcher::new(Arc::clone(&self.provider), self.mailbox.clone())
            .with_retry(self.retry);

        log.info(format!(
            "Starting export {} to {} ({} weeks)",
            start,
            end,
            windows.len()
        ));

        let mut emails = Vec::new();
        let mut breakdown = Vec::with_capacity(windows.len());
        let mut progress = ExportProgress {
            week_label: String::new(),
            week_percent: 0,
            weeks_completed: 0,
            weeks_total: windows.len(),
            emails_found: 0,
            emails_processed: 0,
            status: WeekStatus::Running,
        };

        for (index, window) in windows.iter().enumerate() {
            progress.week_label = window.label.clone();
            progress.week_percent = 0;
            progress.status = WeekStatus::Running;
            on_progress(&progress);

            let summary = self
                .export_week(window, &fetcher, log, &mut emails, &mut progress, &mut on_progress)
                .await?;

            progress.weeks_completed += 1;
            progress.week_percent = 100;
            progress.status = summary.status;
            on_progress(&progress);

            let pause = match summary.status {
                WeekStatus::Failed => self.failure_delay,
                _ => self.success_delay,
            };
            breakdown.push(summary);

            if index + 1 < windows.len() && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        let failed_weeks = breakdown
            .iter()
            .filter(|w| w.status == WeekStatus::Failed)
            .count();
        let total_emails = emails.len();

        if failed_weeks > 0 {
            log.warning(format!(
                "Export finished with {} failed week(s): {} emails",
                failed_weeks, total_emails
            ));
        } else {
            log.success(format!("Export finished: {} emails", total_emails));
        }

        Ok(ExportResult {
            start,
            end,
            exported_at: Utc::now(),
            account: self.mailbox.account_id.clone(),
            emails,
            weekly_breakdown: breakdown,
            total_emails,
            failed_weeks,
        })
    }

    async fn export_week<F>(
        &self,
        window: &WeekWindow,
        fetcher: &BatchFetcher,
        log: &SyncLog,
        emails: &mut Vec<MailItem>,
        progress: &mut ExportProgress,
        on_progress: &mut F,
    ) -> Result<WeekSummary, SyncError>
    where
        F: FnMut(&ExportProgress),
    {
        let mut summary = WeekSummary {
            label: window.label.clone(),
            start: window.start,
            end: window.end,
            emails: 0,
            failed_fetches: 0,
            status: WeekStatus::Completed,
            error: None,
        };

        let ids = match self
            .provider
            .list_message_ids(&self.mailbox, &window.query(), self.page_size)
            .await
        {
            Ok(ids) => ids,
            Err(e) if ErrorKind::of_remote(&e).is_fatal() => {
                log.error(format!("Week {}: authentication rejected", window.label));
                return Err(SyncError::from_remote(&e));
            }
            Err(e) => {
                log.error(format!("Week {} failed: {:#}", window.label, e));
                summary.status = WeekStatus::Failed;
                summary.error = Some(format!("{:#}", e));
                return Ok(summary);
            }
        };

        progress.emails_found += ids.len();
        log.info(format!("Week {}: {} messages found", window.label, ids.len()));

        let base_processed = progress.emails_processed;
        let outcomes = fetcher
            .fetch_all_with_progress(&ids, self.batch_size, self.batch_delay, |batch| {
                progress.week_percent = batch.percent();
                progress.emails_processed = base_processed + batch.processed;
                on_progress(progress);
            })
            .await;

        let (items, failures) = split_outcomes(outcomes);
        if let Some(auth) = failures.iter().find(|f| f.kind.is_fatal()) {
            log.error(format!("Week {}: authentication rejected", window.label));
            return Err(SyncError::Authentication {
                message: auth.message.clone(),
            });
        }

        summary.emails = items.len();
        summary.failed_fetches = failures.len();
        if failures.is_empty() {
            log.success(format!("Week {}: {} emails", window.label, items.len()));
        } else {
            log.warning(format!(
                "Week {}: {} emails, {} could not be fetched",
                window.label,
                items.len(),
                failures.len()
            ));
        }
        emails.extend(items);

        Ok(summary)
    }
}

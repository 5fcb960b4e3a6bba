//! Subcommand handlers

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use mailsync::{
    ErrorKind, ExportProgress, LogEntry, LogLevel, MigrationReport, SmartFetchReport, SyncConfig,
    SyncService, WeekStatus,
};

use crate::Command;

pub async fn run(command: Command) -> Result<()> {
    let service = open_service()?;

    match command {
        Command::Login { token } => login(&service, &token).await,
        Command::Logout {} => {
            service.logout()?;
            println!("Signed out");
            Ok(())
        }
        Command::Status {} => status(&service).await,
        Command::Migrate {} => migrate(&service).await,
        Command::Fetch {} => fetch(&service).await,
        Command::Export { start, end, output } => export(&service, start, end, &output).await,
        Command::Cache { clear } => cache(&service, clear),
    }
}

fn open_service() -> Result<SyncService> {
    let config = SyncConfig::load().context("Failed to load sync.json")?;
    let data_dir = config::ensure_data_dir()?;
    let service = SyncService::open(&data_dir, config)?;
    Ok(service.with_log_sink(Arc::new(print_entry)))
}

fn print_entry(entry: &LogEntry) {
    let tag = match entry.level {
        LogLevel::Info => "  ",
        LogLevel::Success => "ok",
        LogLevel::Warning => "!!",
        LogLevel::Error => "xx",
    };
    println!("[{}] {} {}", entry.timestamp.format("%H:%M:%S"), tag, entry.message);
}

async fn login(service: &SyncService, token: &str) -> Result<()> {
    let session = service.login(token).await?;
    println!(
        "Signed in as {} (session expires {})",
        session.profile.email,
        session.expires_at.format("%H:%M:%S UTC")
    );
    Ok(())
}

async fn status(service: &SyncService) -> Result<()> {
    match service.session()? {
        Some(session) => println!(
            "Session: {} until {}",
            session.profile.email,
            session.expires_at.format("%H:%M:%S UTC")
        ),
        None => println!("Session: none (run `ledger login --token ...`)"),
    }

    let scan = service.scan().await?;
    println!("Partitions: {}", scan.partition_count);
    if let (Some(first), Some(last)) = (scan.months.first(), scan.months.last()) {
        println!("Months: {} .. {}", first, last);
    }
    match scan.most_recent_item_timestamp {
        Some(ts) => println!("Latest email: {}", ts.to_rfc3339()),
        None => println!("Latest email: none"),
    }
    if scan.legacy_detected {
        println!("Legacy archive present: run `ledger migrate` before fetching");
    }
    Ok(())
}

async fn migrate(service: &SyncService) -> Result<()> {
    let MigrationReport {
        success,
        migrated_months,
        migrated_items,
        skipped_undated,
        ..
    } = service.migrate().await;

    if !success {
        bail!("Migration did not complete");
    }
    println!(
        "Migrated {} emails into {} month(s), {} skipped without date",
        migrated_items, migrated_months, skipped_undated
    );
    Ok(())
}

async fn fetch(service: &SyncService) -> Result<()> {
    let report: SmartFetchReport = service.smart_fetch().await;

    if let Some(error) = &report.error {
        bail!("{}", error.message);
    }

    println!(
        "Fetched {} ({} failed): {} new, {} duplicates in {} ms",
        report.fetched, report.failed, report.new_items, report.duplicates, report.duration_ms
    );
    for month in &report.months {
        match &month.error {
            Some(e) => println!("  {}  failed: {}", month.month, e),
            None => println!(
                "  {}  +{} new, {} duplicates",
                month.month, month.new_items, month.duplicates
            ),
        }
    }
    // Month failures are already listed above
    for issue in report.issues.iter().filter(|i| i.kind != ErrorKind::Partial) {
        println!("  skipped {} ({:?}): {}", issue.subject, issue.kind, issue.message);
    }
    Ok(())
}

async fn export(service: &SyncService, start: NaiveDate, end: NaiveDate, output: &Path) -> Result<()> {
    let result = service
        .export_range(start, end, |p: &ExportProgress| {
            if p.status != WeekStatus::Running || p.week_percent == 100 {
                log::info!(
                    "{} [{}/{} weeks] {}%: {} found, {} processed",
                    p.week_label,
                    p.weeks_completed,
                    p.weeks_total,
                    p.week_percent,
                    p.emails_found,
                    p.emails_processed
                );
            }
        })
        .await?;

    config::save_json_file(output, &result)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Exported {} emails to {} ({} of {} weeks failed)",
        result.total_emails,
        output.display(),
        result.failed_weeks,
        result.weekly_breakdown.len()
    );
    Ok(())
}

fn cache(service: &SyncService, clear: bool) -> Result<()> {
    let Some(session) = service.session()? else {
        bail!("No active session. Sign in again");
    };
    let cache = service.result_cache(&session.profile.email);

    if clear {
        cache.clear()?;
        println!("Result cache cleared");
        return Ok(());
    }

    match cache.load()? {
        Some(entry) => println!(
            "Cached {} of {} emails ({:?}), captured {}",
            entry.items.len(),
            entry.original_count,
            entry.fidelity,
            entry.captured_at.to_rfc3339()
        ),
        None => println!("Result cache empty or expired"),
    }
    if let Some(usage) = cache.usage() {
        println!("Local storage: {} / {} bytes", usage.used_bytes, usage.quota_bytes);
    }
    Ok(())
}

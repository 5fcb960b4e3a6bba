//! SyncService facade
//!
//! Wires the provider, partition store, local store and configuration
//! together and exposes the operations a host application calls. Every
//! operation returns a structured result; fatal conditions come back as
//! [`SyncError`] values or as a report with `success == false`.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::cache::{ResultCache, SaveOutcome, SessionStore};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetch::{ExportProgress, ExportResult, WeeklyExporter};
use crate::gmail::GmailClient;
use crate::models::Session;
use crate::provider::MailProvider;
use crate::storage::{
    FileLocalStore, FilePartitionStore, LocalStore, PartitionLocks, PartitionStore, ScanResult,
};
use crate::sync::{LogSink, MigrationReport, MigrationTool, SmartFetch, SmartFetchReport, SyncLog};

/// Session namespace for a single-user host
const DEFAULT_NAMESPACE: &str = "default";

/// Account recorded on migrated partitions when nothing better is known
const UNKNOWN_ACCOUNT: &str = "unknown";

/// Main entry point for sync operations
pub struct SyncService {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn PartitionStore>,
    locks: Arc<PartitionLocks>,
    local: Arc<dyn LocalStore>,
    sessions: SessionStore,
    config: SyncConfig,
    sink: Option<Arc<dyn LogSink>>,
}

impl SyncService {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn PartitionStore>,
        local: Arc<dyn LocalStore>,
        config: SyncConfig,
    ) -> Self {
        let sessions = SessionStore::new(Arc::clone(&local), DEFAULT_NAMESPACE, config.session_ttl());
        Self {
            provider,
            store,
            locks: Arc::new(PartitionLocks::new()),
            local,
            sessions,
            config,
            sink: None,
        }
    }

    /// Open file-backed stores under `data_dir` and talk to Gmail
    ///
    /// Layout: `archive/` holds month partitions, `local/` holds the result
    /// cache and session documents.
    pub fn open(data_dir: &Path, config: SyncConfig) -> Result<Self> {
        let store = FilePartitionStore::new(data_dir.join("archive"))
            .context("Failed to open partition archive")?;
        let local = FileLocalStore::new(data_dir.join("local"), config.cache.local_quota_bytes)
            .context("Failed to open local store")?;
        let provider = GmailClient::with_base_url(&config.gmail_api_base);

        Ok(Self::new(
            Arc::new(provider),
            Arc::new(store),
            Arc::new(local),
            config,
        ))
    }

    /// Deliver every log entry to `sink` as it is recorded
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn new_log(&self) -> SyncLog {
        match &self.sink {
            Some(sink) => SyncLog::with_sink(Arc::clone(sink)),
            None => SyncLog::new(),
        }
    }

    fn storage_error(e: anyhow::Error) -> SyncError {
        SyncError::Storage {
            message: format!("{:#}", e),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Validate a credential with the provider and persist it
    pub async fn login(&self, credential: &str) -> Result<Session, SyncError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(SyncError::Configuration {
                message: "Access token is empty".to_string(),
            });
        }

        let profile = self
            .provider
            .get_profile(credential)
            .await
            .map_err(|e| SyncError::from_remote(&e))?;

        log::info!("Signed in as {}", profile.email);
        self.sessions
            .persist(credential, profile)
            .map_err(Self::storage_error)
    }

    /// Drop the session and the signed-in account's cached results
    pub fn logout(&self) -> Result<(), SyncError> {
        if let Some(session) = self.session()? {
            self.result_cache(&session.profile.email)
                .clear()
                .map_err(Self::storage_error)?;
        }
        self.sessions.invalidate().map_err(Self::storage_error)
    }

    /// The current session, if one is still valid
    pub fn session(&self) -> Result<Option<Session>, SyncError> {
        self.sessions.retrieve().map_err(Self::storage_error)
    }

    fn require_session(&self) -> Result<Session, SyncError> {
        self.session()?.ok_or_else(SyncError::no_session)
    }

    /// Result cache for an account
    pub fn result_cache(&self, account: &str) -> ResultCache {
        ResultCache::new(Arc::clone(&self.local), account, self.config.cache.clone())
    }

    // ========================================================================
    // Archive
    // ========================================================================

    pub async fn scan(&self) -> Result<ScanResult, SyncError> {
        self.store.scan().await.map_err(Self::storage_error)
    }

    /// Migrate a legacy flat archive into month partitions, if present
    pub async fn migrate(&self) -> MigrationReport {
        let account = match self.session() {
            Ok(Some(session)) => session.profile.email,
            _ => UNKNOWN_ACCOUNT.to_string(),
        };

        let tool = MigrationTool::new(Arc::clone(&self.store), Arc::clone(&self.locks));
        tool.migrate(&account, &self.new_log()).await
    }

    /// Fetch everything newer than the archive's watermark and merge it
    pub async fn smart_fetch(&self) -> SmartFetchReport {
        let log = self.new_log();
        let session = match self.require_session() {
            Ok(session) => session,
            Err(e) => return SmartFetchReport::refused(&e, &log),
        };

        let engine = SmartFetch::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            self.config.clone(),
        );
        engine.run(&session.mailbox(), &log).await
    }

    /// Export `[start, end]` week by week
    ///
    /// The emails are also offered to the account's result cache; a cache
    /// failure never fails the export.
    pub async fn export_range<F>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        on_progress: F,
    ) -> Result<ExportResult, SyncError>
    where
        F: FnMut(&ExportProgress),
    {
        let session = self.require_session()?;
        let log = self.new_log();
        let exporter =
            WeeklyExporter::new(Arc::clone(&self.provider), session.mailbox(), &self.config);

        let started = Instant::now();
        let result = exporter.export(start, end, &log, on_progress).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match self
            .result_cache(&session.profile.email)
            .save(&result.emails, elapsed_ms)
        {
            SaveOutcome::Saved => log::debug!("Cached {} emails", result.total_emails),
            SaveOutcome::Degraded(fidelity) => {
                log::info!("Cached {} emails at {:?} fidelity", result.total_emails, fidelity)
            }
            SaveOutcome::Failed(kind) => {
                log::warn!("Continuing without a result cache ({:?})", kind)
            }
        }

        Ok(result)
    }
}

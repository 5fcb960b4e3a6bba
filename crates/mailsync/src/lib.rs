//! Mail sync crate - incremental email archiving for Ledger
//!
//! This crate provides:
//! - Domain models (MailItem, month Partition, Session)
//! - Gmail API client behind the [`MailProvider`] trait
//! - Batched, paced fetching and week-by-week bulk export
//! - Smart Fetch: watermark-driven incremental sync into month partitions
//! - Legacy flat archive migration
//! - Quota-aware local result cache and session store
//!
//! Everything is async on tokio; the host application owns the runtime and
//! presents the returned reports and log streams.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gmail;
pub mod models;
pub mod provider;
pub mod service;
pub mod storage;
pub mod sync;

pub use cache::{CacheEntry, CacheFidelity, ResultCache, SaveOutcome, SessionStore, StorageUsage};
pub use config::{CacheConfig, SyncConfig};
pub use error::{AuthRejectedError, ErrorKind, Issue, RateLimitedError, SyncError};
pub use fetch::{
    BatchFetcher, ExportProgress, ExportResult, RetryPolicy, WeekStatus, WeekSummary, WeekWindow,
    WeeklyExporter, weeks,
};
pub use gmail::GmailClient;
pub use models::{LegacyArchive, MailItem, MailItemId, Mailbox, MonthKey, Partition, Session, UserProfile};
pub use provider::{InMemoryProvider, MailProvider};
pub use service::SyncService;
pub use storage::{
    FileLocalStore, FilePartitionStore, InMemoryLocalStore, InMemoryPartitionStore, LocalStore,
    PartitionLocks, PartitionStore, ScanResult,
};
pub use sync::{
    LogEntry, LogLevel, LogSink, MigrationReport, MigrationTool, MonthMergeOutcome, SmartFetch,
    SmartFetchReport, SyncLog, SyncPhase,
};

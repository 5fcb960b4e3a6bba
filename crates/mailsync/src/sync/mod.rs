//! Sync engine: Smart Fetch, partition merge, and legacy migration
//!
//! Every operation records a [`SyncLog`] whose entries are returned in its
//! report for display.

mod engine;
mod merge;
mod migrate;
mod oplog;

pub use engine::{MonthMergeOutcome, SmartFetch, SmartFetchReport, SyncErrorReport, SyncPhase};
pub use merge::{
    MergeCounts, MergeResult, MonthGroups, group_by_month, merge_into_partition, merge_month,
};
pub use migrate::{MigrationReport, MigrationTool};
pub use oplog::{LogEntry, LogLevel, LogSink, SyncLog};

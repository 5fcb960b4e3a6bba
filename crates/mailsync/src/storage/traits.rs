//! Storage trait definitions

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{LegacyArchive, MonthKey, Partition};

/// Summary of what a partition store currently holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub partition_count: usize,
    /// Months with a partition, ascending
    pub months: Vec<MonthKey>,
    /// Latest resolved item timestamp across all partitions
    pub most_recent_item_timestamp: Option<DateTime<Utc>>,
    /// A flat, pre-partitioning archive is still present
    pub legacy_detected: bool,
}

/// Month-keyed document store for archived mail
///
/// Each partition is an atomic unit: `write` replaces the whole document.
/// Read-modify-write cycles must be serialized per month by the caller
/// (see [`PartitionLocks`](super::PartitionLocks)).
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Summarize stored partitions
    async fn scan(&self) -> Result<ScanResult>;

    /// Read one month's partition
    async fn read(&self, month: &MonthKey) -> Result<Option<Partition>>;

    /// Replace one month's partition
    async fn write(&self, month: &MonthKey, partition: &Partition) -> Result<()>;

    /// Read the legacy flat archive, if present
    async fn read_legacy(&self) -> Result<Option<LegacyArchive>>;

    /// Retire the legacy archive after a successful migration
    ///
    /// Afterwards `scan` no longer reports it. Retiring an absent archive is
    /// a no-op.
    async fn retire_legacy(&self) -> Result<()>;
}

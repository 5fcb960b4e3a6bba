//! In-memory partition store
//!
//! Used by tests and offline demos. Writes for chosen months can be made to
//! fail to exercise per-partition error handling.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{PartitionStore, ScanResult};
use crate::models::{LegacyArchive, MonthKey, Partition};

pub struct InMemoryPartitionStore {
    partitions: RwLock<BTreeMap<MonthKey, Partition>>,
    legacy: RwLock<Option<LegacyArchive>>,
    failing_writes: RwLock<HashSet<MonthKey>>,
    write_count: AtomicUsize,
}

impl InMemoryPartitionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
            legacy: RwLock::new(None),
            failing_writes: RwLock::new(HashSet::new()),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Create a store holding only a legacy flat archive
    pub fn with_legacy(archive: LegacyArchive) -> Self {
        let store = Self::new();
        *store.legacy.write().unwrap() = Some(archive);
        store
    }

    /// Make every write for `month` fail
    pub fn fail_writes_for(&self, month: MonthKey) {
        self.failing_writes.write().unwrap().insert(month);
    }

    /// Snapshot of one partition
    pub fn partition(&self, month: &MonthKey) -> Option<Partition> {
        self.partitions.read().unwrap().get(month).cloned()
    }

    /// Snapshot of every partition
    pub fn partitions(&self) -> BTreeMap<MonthKey, Partition> {
        self.partitions.read().unwrap().clone()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn has_legacy(&self) -> bool {
        self.legacy.read().unwrap().is_some()
    }
}

impl Default for InMemoryPartitionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartitionStore for InMemoryPartitionStore {
    async fn scan(&self) -> Result<ScanResult> {
        let partitions = self.partitions.read().unwrap();
        Ok(ScanResult {
            partition_count: partitions.len(),
            months: partitions.keys().cloned().collect(),
            most_recent_item_timestamp: partitions
                .values()
                .filter_map(Partition::most_recent_timestamp)
                .max(),
            legacy_detected: self.legacy.read().unwrap().is_some(),
        })
    }

    async fn read(&self, month: &MonthKey) -> Result<Option<Partition>> {
        Ok(self.partition(month))
    }

    async fn write(&self, month: &MonthKey, partition: &Partition) -> Result<()> {
        if self.failing_writes.read().unwrap().contains(month) {
            bail!("Simulated write failure for {}", month);
        }
        self.partitions
            .write()
            .unwrap()
            .insert(month.clone(), partition.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_legacy(&self) -> Result<Option<LegacyArchive>> {
        Ok(self.legacy.read().unwrap().clone())
    }

    async fn retire_legacy(&self) -> Result<()> {
        self.legacy.write().unwrap().take();
        Ok(())
    }
}

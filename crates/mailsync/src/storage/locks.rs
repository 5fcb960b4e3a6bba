//! Per-month write locks
//!
//! Smart Fetch and migration both read-modify-write partitions. Holding the
//! month's guard across the read and the write keeps a single writer per
//! partition even when operations run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::models::MonthKey;

#[derive(Default)]
pub struct PartitionLocks {
    locks: Mutex<HashMap<MonthKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl PartitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `month`
    pub async fn lock(&self, month: &MonthKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(month.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

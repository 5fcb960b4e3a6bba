//! File-based partition storage
//!
//! Directory structure:
//! ```text
//! archive/
//!   2025-01.json            # one partition per month
//!   2025-02.json
//!   emails.json             # legacy flat archive, until migrated
//!   emails.migrated.json    # legacy archive after migration
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;

use super::{PartitionStore, ScanResult};
use crate::models::{LegacyArchive, MonthKey, Partition};

/// Legacy flat archive filename
const LEGACY_FILE: &str = "emails.json";

/// Name the legacy archive is moved to once migrated
const RETIRED_LEGACY_FILE: &str = "emails.migrated.json";

/// One JSON document per month under a root directory
pub struct FilePartitionStore {
    root: PathBuf,
}

impl FilePartitionStore {
    /// Create a store at the given path, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).context("Failed to create archive directory")?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, month: &MonthKey) -> PathBuf {
        self.root.join(format!("{}.json", month))
    }

    fn legacy_path(&self) -> PathBuf {
        self.root.join(LEGACY_FILE)
    }

    /// Month keys with a partition file, ascending
    async fn list_months(&self) -> Result<Vec<MonthKey>> {
        let mut months = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str()
                && let Some(stem) = name.strip_suffix(".json")
                && let Ok(month) = MonthKey::parse(stem)
            {
                months.push(month);
            }
        }

        months.sort();
        Ok(months)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl PartitionStore for FilePartitionStore {
    async fn scan(&self) -> Result<ScanResult> {
        let months = self.list_months().await?;

        let mut most_recent = None;
        for month in &months {
            if let Some(partition) = self.read(month).await? {
                most_recent = most_recent.max(partition.most_recent_timestamp());
            }
        }

        let legacy_detected = fs::try_exists(self.legacy_path())
            .await
            .context("Failed to check for legacy archive")?;

        Ok(ScanResult {
            partition_count: months.len(),
            months,
            most_recent_item_timestamp: most_recent,
            legacy_detected,
        })
    }

    async fn read(&self, month: &MonthKey) -> Result<Option<Partition>> {
        Self::read_json(&self.partition_path(month)).await
    }

    async fn write(&self, month: &MonthKey, partition: &Partition) -> Result<()> {
        let path = self.partition_path(month);
        let data = serde_json::to_vec_pretty(partition).context("Failed to serialize partition")?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &data)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }

    async fn read_legacy(&self) -> Result<Option<LegacyArchive>> {
        Self::read_json(&self.legacy_path()).await
    }

    async fn retire_legacy(&self) -> Result<()> {
        let path = self.legacy_path();
        if !fs::try_exists(&path).await? {
            return Ok(());
        }
        fs::rename(&path, self.root.join(RETIRED_LEGACY_FILE))
            .await
            .context("Failed to retire legacy archive")?;
        Ok(())
    }
}

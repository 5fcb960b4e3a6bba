//! Quota-bounded local key-value storage
//!
//! Backs the result cache and the session store. Writes that would push the
//! store past its quota fail with [`LocalStoreError::QuotaExceeded`], which
//! callers detect with `downcast_ref` to trigger degradation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};

/// Typed local storage failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Local storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
}

/// Synchronous string key-value store with a byte quota
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    /// Bytes currently held
    fn usage_bytes(&self) -> Result<usize>;

    fn quota_bytes(&self) -> usize;
}

/// Whether an error is a quota rejection
pub fn is_quota_exceeded(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<LocalStoreError>(),
        Some(LocalStoreError::QuotaExceeded { .. })
    )
}

fn check_quota(used_by_others: usize, needed: usize, quota: usize) -> Result<()> {
    let available = quota.saturating_sub(used_by_others);
    if needed > available {
        return Err(LocalStoreError::QuotaExceeded { needed, available }.into());
    }
    Ok(())
}

/// In-memory local store
pub struct InMemoryLocalStore {
    entries: RwLock<HashMap<String, String>>,
    quota: usize,
}

impl InMemoryLocalStore {
    pub fn new(quota: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota,
        }
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        let used_by_others: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| Self::entry_size(k, v))
            .sum();
        check_quota(used_by_others, Self::entry_size(key, value), self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    fn usage_bytes(&self) -> Result<usize> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| Self::entry_size(k, v))
            .sum())
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }
}

/// One file per key under a directory
///
/// Keys are percent-encoded into filenames. Usage is the total size of the
/// entry files.
pub struct FileLocalStore {
    root: PathBuf,
    quota: usize,
}

impl FileLocalStore {
    pub fn new(root: impl AsRef<Path>, quota: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create local store directory")?;
        Ok(Self { root, quota })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(key)))
    }

    fn file_size(path: &Path) -> usize {
        fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0)
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        let used_by_others = self.usage_bytes()?.saturating_sub(Self::file_size(&path));
        check_quota(used_by_others, value.len(), self.quota)?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, value)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn usage_bytes(&self) -> Result<usize> {
        let mut total = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                total += entry.metadata()?.len() as usize;
            }
        }
        Ok(total)
    }

    fn quota_bytes(&self) -> usize {
        self.quota
    }
}

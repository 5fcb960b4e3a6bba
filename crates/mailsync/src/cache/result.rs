//! Size-bounded local cache of the last fetched result set
//!
//! Entries are reduced before they are stored. Each reduction is measured
//! against the size ceiling and the next coarser one is tried while it is
//! over, down to a minimal entry; nothing is stored if even that is over. If
//! the store rejects the write for quota, any existing entry is cleared and a
//! minimal entry is attempted. Staleness is checked on read only.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::config::CacheConfig;
use crate::error::ErrorKind;
use crate::models::{Header, MailItem, MailItemId};
use crate::storage::{LocalStore, is_quota_exceeded};

/// Bumped whenever [`CacheEntry`]'s layout changes
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Headers kept at standard fidelity
const STANDARD_HEADERS: &[&str] = &["From", "To", "Subject", "Date"];

/// Headers kept once degraded
const DEGRADED_HEADERS: &[&str] = &["Date"];

/// How much of the original result set an entry retains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFidelity {
    Standard,
    Degraded,
    Minimal,
}

/// Reduced copy of a [`MailItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedItem {
    pub id: MailItemId,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub ignored: bool,
}

/// Snapshot stored by [`ResultCache`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub version: u32,
    pub fidelity: CacheFidelity,
    pub items: Vec<CachedItem>,
    /// Item count before any reduction
    pub original_count: usize,
    pub fetch_duration_ms: u64,
    pub captured_at: DateTime<Utc>,
}

/// Result of [`ResultCache::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored at standard fidelity
    Saved,
    /// Stored after degradation
    Degraded(CacheFidelity),
    /// Nothing could be stored; proceed without a cache
    Failed(ErrorKind),
}

/// Display-only storage usage figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub used_bytes: usize,
    pub quota_bytes: usize,
}

pub struct ResultCache {
    store: Arc<dyn LocalStore>,
    key: String,
    config: CacheConfig,
    usage: Mutex<Option<StorageUsage>>,
}

impl ResultCache {
    /// Cache for one namespace (typically the account email)
    pub fn new(store: Arc<dyn LocalStore>, namespace: &str, config: CacheConfig) -> Self {
        Self {
            store,
            key: format!("mail_cache:{}", namespace),
            config,
            usage: Mutex::new(None),
        }
    }

    pub fn save(&self, items: &[MailItem], fetch_duration_ms: u64) -> SaveOutcome {
        self.save_at(items, fetch_duration_ms, Utc::now())
    }

    pub fn save_at(
        &self,
        items: &[MailItem],
        fetch_duration_ms: u64,
        now: DateTime<Utc>,
    ) -> SaveOutcome {
        let reduce = |fidelity| self.reduce(items, fidelity, fetch_duration_ms, now);

        let mut fitted = None;
        for fidelity in [
            CacheFidelity::Standard,
            CacheFidelity::Degraded,
            CacheFidelity::Minimal,
        ] {
            let json = match serialize(&reduce(fidelity)) {
                Ok(json) => json,
                Err(e) => {
                    log::error!("Failed to serialize cache entry: {:#}", e);
                    return SaveOutcome::Failed(ErrorKind::DataShape);
                }
            };
            if json.len() <= self.config.max_entry_bytes {
                fitted = Some((fidelity, json));
                break;
            }
            log::warn!(
                "Cache entry at {:?} fidelity is {} bytes (limit {}), degrading",
                fidelity,
                json.len(),
                self.config.max_entry_bytes
            );
        }

        let Some((fidelity, json)) = fitted else {
            log::error!("Cache entry over the size ceiling at every fidelity, not caching");
            return SaveOutcome::Failed(ErrorKind::Quota);
        };

        let outcome = match self.store.set(&self.key, &json) {
            Ok(()) if fidelity == CacheFidelity::Standard => SaveOutcome::Saved,
            Ok(()) => SaveOutcome::Degraded(fidelity),
            Err(e) if is_quota_exceeded(&e) => {
                log::warn!("Cache write over quota, retrying with minimal entry: {}", e);
                self.save_minimal(&reduce(CacheFidelity::Minimal))
            }
            Err(e) => {
                log::error!("Failed to write cache entry: {:#}", e);
                SaveOutcome::Failed(ErrorKind::of_local(&e))
            }
        };

        if !matches!(outcome, SaveOutcome::Failed(_)) {
            self.refresh_usage();
        }
        outcome
    }

    fn save_minimal(&self, entry: &CacheEntry) -> SaveOutcome {
        if let Err(e) = self.store.remove(&self.key) {
            log::warn!("Failed to clear cache entry: {:#}", e);
        }

        let json = match serialize(entry) {
            Ok(json) if json.len() <= self.config.max_entry_bytes => json,
            Ok(json) => {
                log::error!(
                    "Minimal cache entry is {} bytes (limit {}), continuing without cache",
                    json.len(),
                    self.config.max_entry_bytes
                );
                return SaveOutcome::Failed(ErrorKind::Quota);
            }
            Err(e) => {
                log::error!("Failed to serialize cache entry: {:#}", e);
                return SaveOutcome::Failed(ErrorKind::DataShape);
            }
        };

        match self.store.set(&self.key, &json) {
            Ok(()) => SaveOutcome::Degraded(CacheFidelity::Minimal),
            Err(e) => {
                log::error!("Minimal cache write failed, continuing without cache: {:#}", e);
                SaveOutcome::Failed(ErrorKind::of_local(&e))
            }
        }
    }

    /// Load the entry if it is younger than the TTL
    pub fn load(&self) -> Result<Option<CacheEntry>> {
        self.load_at(Utc::now())
    }

    /// Like [`load`](Self::load) at an explicit instant
    ///
    /// Stale or unreadable entries are purged and reported absent.
    pub fn load_at(&self, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let Some(json) = self.store.get(&self.key)? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&json) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Discarding unreadable cache entry: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };

        if entry.version != CACHE_SCHEMA_VERSION
            || now - entry.captured_at >= Duration::minutes(self.config.ttl_minutes)
        {
            log::debug!("Cache entry captured at {} expired", entry.captured_at);
            self.clear()?;
            return Ok(None);
        }

        self.refresh_usage();
        Ok(Some(entry))
    }

    pub fn clear(&self) -> Result<()> {
        self.store
            .remove(&self.key)
            .context("Failed to clear result cache")?;
        self.refresh_usage();
        Ok(())
    }

    /// Last known storage usage, if any operation has measured it
    pub fn usage(&self) -> Option<StorageUsage> {
        self.usage.lock().ok().and_then(|u| *u)
    }

    fn refresh_usage(&self) {
        let measured = self.store.usage_bytes().ok().map(|used_bytes| StorageUsage {
            used_bytes,
            quota_bytes: self.store.quota_bytes(),
        });
        if let Ok(mut usage) = self.usage.lock() {
            *usage = measured;
        }
    }

    fn reduce(
        &self,
        items: &[MailItem],
        fidelity: CacheFidelity,
        fetch_duration_ms: u64,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let standard = Limits {
            excerpt_chars: self.config.excerpt_chars,
            field_chars: self.config.field_chars,
            headers: STANDARD_HEADERS,
        };
        let (limit, limits) = match fidelity {
            CacheFidelity::Standard => (items.len(), standard),
            CacheFidelity::Degraded => (
                self.config.degraded_max_items,
                Limits {
                    excerpt_chars: self.config.degraded_excerpt_chars,
                    field_chars: self.config.degraded_field_chars,
                    headers: DEGRADED_HEADERS,
                },
            ),
            CacheFidelity::Minimal => (
                self.config.minimal_items,
                Limits {
                    excerpt_chars: 0,
                    field_chars: self.config.degraded_field_chars,
                    headers: &[],
                },
            ),
        };

        CacheEntry {
            version: CACHE_SCHEMA_VERSION,
            fidelity,
            items: items
                .iter()
                .take(limit)
                .map(|item| reduce_item(item, &limits))
                .collect(),
            original_count: items.len(),
            fetch_duration_ms,
            captured_at: now,
        }
    }
}

fn serialize(entry: &CacheEntry) -> Result<String> {
    serde_json::to_string(entry).context("Failed to serialize cache entry")
}

/// Per-item caps for one fidelity level
struct Limits {
    excerpt_chars: usize,
    field_chars: usize,
    headers: &'static [&'static str],
}

fn reduce_item(item: &MailItem, limits: &Limits) -> CachedItem {
    let clip = |s: &str, n: usize| s.chars().take(n).collect::<String>();
    CachedItem {
        id: item.id.clone(),
        date: item.resolved_timestamp(),
        sender: clip(&item.sender, limits.field_chars),
        subject: clip(&item.subject, limits.field_chars),
        excerpt: clip(&item.excerpt, limits.excerpt_chars),
        headers: item
            .headers
            .iter()
            .filter(|h| limits.headers.iter().any(|k| h.name.eq_ignore_ascii_case(k)))
            .map(|h| Header {
                name: h.name.clone(),
                value: clip(&h.value, limits.field_chars),
            })
            .collect(),
        ignored: item.ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryLocalStore;
    use chrono::TimeZone;

    fn items(count: usize, excerpt_len: usize) -> Vec<MailItem> {
        (0..count)
            .map(|i| {
                MailItem::builder(format!("m{}", i))
                    .date(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
                    .sender("Bank <alerts@bank.example>")
                    .subject(format!("Statement {}", i))
                    .excerpt("x".repeat(excerpt_len))
                    .header("From", "alerts@bank.example")
                    .header("Date", "Wed, 1 Jan 2025 00:00:00 +0000")
                    .header("X-Mailer", "bulk")
                    .build()
            })
            .collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn cache_with(quota: usize, config: CacheConfig) -> (Arc<InMemoryLocalStore>, ResultCache) {
        let store = Arc::new(InMemoryLocalStore::new(quota));
        let cache = ResultCache::new(store.clone(), "me@example.com", config);
        (store, cache)
    }

    #[test]
    fn test_standard_save_reduces_fields() {
        let (store, cache) = cache_with(10 * 1024 * 1024, CacheConfig::default());

        assert_eq!(cache.save_at(&items(3, 1000), 42, t0()), SaveOutcome::Saved);

        let entry = cache.load_at(t0()).unwrap().unwrap();
        assert_eq!(entry.fidelity, CacheFidelity::Standard);
        assert_eq!(entry.items.len(), 3);
        assert_eq!(entry.fetch_duration_ms, 42);
        assert_eq!(entry.items[0].excerpt.len(), 300);
        let names: Vec<&str> = entry.items[0].headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["From", "Date"]);
        assert!(store.get("mail_cache:me@example.com").unwrap().is_some());
    }

    #[test]
    fn test_staleness_is_checked_on_read() {
        let (store, cache) = cache_with(10 * 1024 * 1024, CacheConfig::default());
        cache.save_at(&items(2, 10), 5, t0());

        assert!(cache.load_at(t0() + Duration::minutes(29)).unwrap().is_some());
        assert!(cache.load_at(t0() + Duration::minutes(31)).unwrap().is_none());
        // Purged, not just hidden
        assert!(store.get("mail_cache:me@example.com").unwrap().is_none());
        assert!(cache.load_at(t0()).unwrap().is_none());
    }

    #[test]
    fn test_oversized_entry_is_degraded() {
        let config = CacheConfig {
            max_entry_bytes: 20_000,
            degraded_max_items: 10,
            ..CacheConfig::default()
        };
        let (_, cache) = cache_with(10 * 1024 * 1024, config);

        let outcome = cache.save_at(&items(100, 500), 1, t0());
        assert_eq!(outcome, SaveOutcome::Degraded(CacheFidelity::Degraded));

        let entry = cache.load_at(t0()).unwrap().unwrap();
        assert_eq!(entry.items.len(), 10);
        assert_eq!(entry.original_count, 100);
        assert_eq!(entry.items[0].excerpt.len(), 100);
        assert_eq!(entry.items[0].headers.len(), 1);
    }

    #[test]
    fn test_degraded_entry_still_over_ceiling_falls_to_minimal() {
        let config = CacheConfig {
            max_entry_bytes: 20_000,
            degraded_max_items: 400,
            ..CacheConfig::default()
        };
        let (store, cache) = cache_with(10 * 1024 * 1024, config);
        let mut oversized = items(400, 10);
        for item in &mut oversized {
            item.subject = "s".repeat(16 * 1024);
        }

        let outcome = cache.save_at(&oversized, 1, t0());
        assert_eq!(outcome, SaveOutcome::Degraded(CacheFidelity::Minimal));

        let stored = store.get("mail_cache:me@example.com").unwrap().unwrap();
        assert!(stored.len() <= 20_000);
        let entry = cache.load_at(t0()).unwrap().unwrap();
        assert_eq!(entry.items.len(), 20);
        assert!(entry.items.iter().all(|i| i.subject.chars().count() <= 80));
    }

    #[test]
    fn test_long_fields_are_capped_at_every_fidelity() {
        let (_, cache) = cache_with(10 * 1024 * 1024, CacheConfig::default());
        let mut long = items(2, 10);
        long[0].sender = "a".repeat(5_000);
        long[0].subject = "b".repeat(5_000);

        assert_eq!(cache.save_at(&long, 1, t0()), SaveOutcome::Saved);

        let entry = cache.load_at(t0()).unwrap().unwrap();
        assert_eq!(entry.items[0].sender.chars().count(), 256);
        assert_eq!(entry.items[0].subject.chars().count(), 256);
    }

    #[test]
    fn test_nothing_stored_when_minimal_is_over_ceiling() {
        let config = CacheConfig {
            max_entry_bytes: 100,
            ..CacheConfig::default()
        };
        let (store, cache) = cache_with(10 * 1024 * 1024, config);

        assert_eq!(
            cache.save_at(&items(50, 10), 1, t0()),
            SaveOutcome::Failed(ErrorKind::Quota)
        );
        assert!(store.get("mail_cache:me@example.com").unwrap().is_none());
    }

    #[test]
    fn test_quota_rejection_falls_back_to_minimal() {
        let (_, cache) = cache_with(8 * 1024, CacheConfig::default());

        let outcome = cache.save_at(&items(200, 200), 1, t0());
        assert_eq!(outcome, SaveOutcome::Degraded(CacheFidelity::Minimal));

        let entry = cache.load_at(t0()).unwrap().unwrap();
        assert_eq!(entry.fidelity, CacheFidelity::Minimal);
        assert_eq!(entry.items.len(), 20);
        assert!(entry.items.iter().all(|i| i.excerpt.is_empty() && i.headers.is_empty()));
    }

    #[test]
    fn test_minimal_write_over_quota_fails() {
        let (_, cache) = cache_with(64, CacheConfig::default());

        assert_eq!(
            cache.save_at(&items(50, 10), 1, t0()),
            SaveOutcome::Failed(ErrorKind::Quota)
        );
        assert!(cache.load_at(t0()).unwrap().is_none());
    }

    #[test]
    fn test_clear_and_usage() {
        let (_, cache) = cache_with(1024 * 1024, CacheConfig::default());
        assert!(cache.usage().is_none());

        cache.save_at(&items(1, 10), 1, t0());
        let usage = cache.usage().unwrap();
        assert!(usage.used_bytes > 0);
        assert_eq!(usage.quota_bytes, 1024 * 1024);

        cache.clear().unwrap();
        assert_eq!(cache.usage().unwrap().used_bytes, 0);
        assert!(cache.load_at(t0()).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_entry_is_purged() {
        let (store, cache) = cache_with(1024, CacheConfig::default());
        store.set("mail_cache:me@example.com", "garbage").unwrap();

        assert!(cache.load_at(t0()).unwrap().is_none());
        assert!(store.get("mail_cache:me@example.com").unwrap().is_none());
    }
}

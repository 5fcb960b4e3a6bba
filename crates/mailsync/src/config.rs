//! Sync engine configuration
//!
//! Loaded from (in order of priority):
//! 1. `sync.json` in the Ledger config directory
//! 2. Built-in defaults
//!
//! `LEDGER_GMAIL_API_BASE` overrides the Gmail API base URL in either case.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::gmail::GmailClient;

/// Config filename in the Ledger config directory
const SYNC_CONFIG_FILE: &str = "sync.json";

/// Environment override for the Gmail API base URL
const API_BASE_ENV: &str = "LEDGER_GMAIL_API_BASE";

/// Tunables for fetch pacing, lookback, and local caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items fetched concurrently per Smart Fetch batch
    pub sync_batch_size: usize,
    /// Pause between Smart Fetch batches
    pub sync_batch_delay_ms: u64,
    /// Items fetched concurrently per export batch
    pub export_batch_size: usize,
    /// Pause between export batches
    pub export_batch_delay_ms: u64,
    /// Pause after a week that completed
    pub week_success_delay_ms: u64,
    /// Pause after a week that failed
    pub week_failure_delay_ms: u64,
    /// Lookback window when no prior data exists
    pub default_lookback_days: i64,
    /// Identifiers requested per listing page; listings always run to the end
    #[serde(alias = "max_results_per_query")]
    pub list_page_size: usize,
    /// Attempts per item fetch (1 = no retry)
    pub retry_attempts: u32,
    /// First backoff delay when retrying
    pub retry_base_delay_ms: u64,
    pub gmail_api_base: String,
    pub cache: CacheConfig,
    /// Absolute lifetime of a persisted session
    pub session_ttl_minutes: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_batch_size: 10,
            sync_batch_delay_ms: 200,
            export_batch_size: 8,
            export_batch_delay_ms: 150,
            week_success_delay_ms: 300,
            week_failure_delay_ms: 500,
            default_lookback_days: 30,
            list_page_size: 500,
            retry_attempts: 1,
            retry_base_delay_ms: 250,
            gmail_api_base: GmailClient::BASE_URL.to_string(),
            cache: CacheConfig::default(),
            session_ttl_minutes: 10,
        }
    }
}

impl SyncConfig {
    /// Load from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        let mut cfg = if config::config_exists(SYNC_CONFIG_FILE) {
            config::load_json(SYNC_CONFIG_FILE)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut cfg: Self = config::load_json_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(API_BASE_ENV)
            && !base.is_empty()
        {
            self.gmail_api_base = base;
        }
    }

    pub fn sync_batch_delay(&self) -> Duration {
        Duration::from_millis(self.sync_batch_delay_ms)
    }

    pub fn export_batch_delay(&self) -> Duration {
        Duration::from_millis(self.export_batch_delay_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes)
    }
}

/// Limits for the local result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are purged on read
    pub ttl_minutes: i64,
    /// Serialized size ceiling for one entry
    pub max_entry_bytes: usize,
    /// Excerpt cap at standard fidelity
    pub excerpt_chars: usize,
    /// Excerpt cap once degraded
    pub degraded_excerpt_chars: usize,
    /// Item cap once degraded
    pub degraded_max_items: usize,
    /// Sender, subject and header value cap at standard fidelity
    pub field_chars: usize,
    /// Sender, subject and header value cap once degraded or minimal
    pub degraded_field_chars: usize,
    /// Items kept by the last-resort minimal write
    pub minimal_items: usize,
    /// Total bytes the local store may hold
    pub local_quota_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            max_entry_bytes: 5 * 1024 * 1024,
            excerpt_chars: 300,
            degraded_excerpt_chars: 100,
            degraded_max_items: 500,
            field_chars: 256,
            degraded_field_chars: 80,
            minimal_items: 20,
            local_quota_bytes: 10 * 1024 * 1024,
        }
    }
}

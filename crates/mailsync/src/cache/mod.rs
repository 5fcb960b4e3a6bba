//! Local per-session caches: the last fetched result set and the session
//!
//! Both are consulted by the host application, not by the sync engine, and
//! both enforce expiry when read.

mod result;
mod session;

pub use result::{
    CACHE_SCHEMA_VERSION, CacheEntry, CacheFidelity, CachedItem, ResultCache, SaveOutcome,
    StorageUsage,
};
pub use session::SessionStore;

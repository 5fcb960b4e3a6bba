//! Storage traits and implementations
//!
//! Month partitions live behind [`PartitionStore`]; the engine never touches
//! the underlying files or maps directly. Small per-session documents (result
//! cache, session) live in a quota-bounded [`LocalStore`].

mod file;
mod local;
mod locks;
mod memory;
mod traits;

pub use file::FilePartitionStore;
pub use local::{FileLocalStore, InMemoryLocalStore, LocalStore, LocalStoreError, is_quota_exceeded};
pub use locks::PartitionLocks;
pub use memory::InMemoryPartitionStore;
pub use traits::{PartitionStore, ScanResult};

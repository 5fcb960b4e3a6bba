//! Remote mail provider abstraction
//!
//! The sync engine never talks HTTP directly. It depends on this trait,
//! implemented by the Gmail client and by an in-memory scripted provider.

mod memory;

pub use memory::InMemoryProvider;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{MailItem, MailItemId, Mailbox, UserProfile};

/// Capability set consumed from the remote mail provider
///
/// Queries use the provider's search syntax, with date bounds written as
/// `after:YYYY/MM/DD` and `before:YYYY/MM/DD`.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// List identifiers of every message matching `query`, newest first
    ///
    /// Implementations follow pagination until the listing is exhausted,
    /// requesting at most `page_size` ids per round trip. Callers narrow the
    /// result with the query, never by truncation.
    async fn list_message_ids(
        &self,
        mailbox: &Mailbox,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<MailItemId>>;

    /// Fetch one full message
    async fn get_message(&self, mailbox: &Mailbox, id: &MailItemId) -> Result<MailItem>;

    /// Resolve the profile a credential belongs to
    async fn get_profile(&self, credential: &str) -> Result<UserProfile>;
}

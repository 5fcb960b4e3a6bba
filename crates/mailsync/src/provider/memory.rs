//! In-memory scripted provider
//!
//! Honors the `after:`/`before:` date bounds of a query, and can be told to
//! fail individual messages, fail queries, or reject the credential. Used for
//! tests and offline demos.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::MailProvider;
use crate::error::AuthRejectedError;
use crate::models::{MailItem, MailItemId, Mailbox, UserProfile};

struct Listed {
    /// Date the provider indexes the message under
    listed_at: DateTime<Utc>,
    item: MailItem,
}

pub struct InMemoryProvider {
    profile: UserProfile,
    messages: RwLock<Vec<Listed>>,
    failing_ids: RwLock<HashSet<MailItemId>>,
    failing_queries: RwLock<Vec<String>>,
    reject_auth: AtomicBool,
    latency: RwLock<Option<Duration>>,
    queries: RwLock<Vec<String>>,
    list_pages: AtomicUsize,
    get_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            profile,
            messages: RwLock::new(Vec::new()),
            failing_ids: RwLock::new(HashSet::new()),
            failing_queries: RwLock::new(Vec::new()),
            reject_auth: AtomicBool::new(false),
            latency: RwLock::new(None),
            queries: RwLock::new(Vec::new()),
            list_pages: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a message indexed under its own resolved timestamp
    ///
    /// Items without a resolvable date are indexed under the Unix epoch;
    /// use [`add_item_listed_at`](Self::add_item_listed_at) to control that.
    pub fn add_item(&self, item: MailItem) {
        let listed_at = item.resolved_timestamp().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.add_item_listed_at(item, listed_at);
    }

    /// Add a message indexed under an explicit date
    pub fn add_item_listed_at(&self, item: MailItem, listed_at: DateTime<Utc>) {
        let mut messages = self.messages.write().unwrap();
        messages.retain(|m| m.item.id != item.id);
        messages.push(Listed { listed_at, item });
    }

    /// Make every fetch of `id` fail
    pub fn fail_message(&self, id: impl Into<MailItemId>) {
        self.failing_ids.write().unwrap().insert(id.into());
    }

    /// Make every listing whose query contains `pattern` fail
    pub fn fail_queries_containing(&self, pattern: impl Into<String>) {
        self.failing_queries.write().unwrap().push(pattern.into());
    }

    pub fn set_reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Delay applied to every message fetch
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = Some(latency);
    }

    /// Queries received so far, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.read().unwrap().clone()
    }

    /// Listing pages served so far
    pub fn list_pages(&self) -> usize {
        self.list_pages.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent message fetches observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<()> {
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(AuthRejectedError.into());
        }
        Ok(())
    }
}

/// Date bounds parsed from a provider query
#[derive(Debug, Default, PartialEq, Eq)]
struct QueryBounds {
    after: Option<NaiveDate>,
    before: Option<NaiveDate>,
}

impl QueryBounds {
    fn parse(query: &str) -> Self {
        let mut bounds = Self::default();
        for token in query.split_whitespace() {
            if let Some(date) = token.strip_prefix("after:") {
                bounds.after = NaiveDate::parse_from_str(date, "%Y/%m/%d").ok();
            } else if let Some(date) = token.strip_prefix("before:") {
                bounds.before = NaiveDate::parse_from_str(date, "%Y/%m/%d").ok();
            }
        }
        bounds
    }

    /// `after` is inclusive, `before` exclusive, both at day granularity
    fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.after.is_none_or(|a| day >= a) && self.before.is_none_or(|b| day < b)
    }
}

#[async_trait]
impl MailProvider for InMemoryProvider {
    async fn list_message_ids(
        &self,
        _mailbox: &Mailbox,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<MailItemId>> {
        self.queries.write().unwrap().push(query.to_string());
        self.check_auth()?;

        if self
            .failing_queries
            .read()
            .unwrap()
            .iter()
            .any(|p| query.contains(p.as_str()))
        {
            return Err(anyhow!("Simulated listing failure for query: {}", query));
        }

        let bounds = QueryBounds::parse(query);
        let messages = self.messages.read().unwrap();
        let mut matching: Vec<&Listed> = messages
            .iter()
            .filter(|m| bounds.contains(m.listed_at))
            .collect();
        matching.sort_by(|a, b| b.listed_at.cmp(&a.listed_at));

        // Served page by page, the way a paginated listing would be
        let mut ids = Vec::with_capacity(matching.len());
        for page in matching.chunks(page_size.max(1)) {
            self.list_pages.fetch_add(1, Ordering::SeqCst);
            ids.extend(page.iter().map(|m| m.item.id.clone()));
        }
        if ids.is_empty() {
            self.list_pages.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ids)
    }

    async fn get_message(&self, _mailbox: &Mailbox, id: &MailItemId) -> Result<MailItem> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let latency = *self.latency.read().unwrap();
        match latency {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_auth()?;

        if self.failing_ids.read().unwrap().contains(id) {
            return Err(anyhow!("Simulated fetch failure for message {}", id));
        }

        self.messages
            .read()
            .unwrap()
            .iter()
            .find(|m| &m.item.id == id)
            .map(|m| m.item.clone())
            .ok_or_else(|| anyhow!("Message not found: {}", id))
    }

    async fn get_profile(&self, _credential: &str) -> Result<UserProfile> {
        self.check_auth()?;
        Ok(self.profile.clone())
    }
}

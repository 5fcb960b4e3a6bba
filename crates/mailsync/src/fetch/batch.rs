//! Batched message retrieval with inter-batch pacing
//!
//! Ids are split into consecutive chunks. Every item of a chunk is fetched
//! concurrently and the chunk completes only when all outcomes are in. Chunks
//! run strictly one after another with a pause in between to bound the
//! request rate. A failed item never fails its chunk.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::RetryPolicy;
use crate::error::ErrorKind;
use crate::models::{MailItem, MailItemId, Mailbox};
use crate::provider::MailProvider;

/// A message that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub id: MailItemId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of fetching one id
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(MailItem),
    Failed(FetchFailure),
}

impl FetchOutcome {
    pub fn id(&self) -> &MailItemId {
        match self {
            FetchOutcome::Fetched(item) => &item.id,
            FetchOutcome::Failed(failure) => &failure.id,
        }
    }
}

/// Split outcomes into fetched items and failures
pub fn split_outcomes(outcomes: Vec<FetchOutcome>) -> (Vec<MailItem>, Vec<FetchFailure>) {
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Fetched(item) => items.push(item),
            FetchOutcome::Failed(failure) => failures.push(failure),
        }
    }
    (items, failures)
}

/// Progress after each completed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based index of the batch just completed
    pub batch: usize,
    pub total_batches: usize,
    /// Ids with an outcome so far
    pub processed: usize,
    pub total: usize,
    pub fetched: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed * 100) / self.total).min(100) as u8
    }
}

/// Fetches full messages for a list of ids
pub struct BatchFetcher {
    provider: Arc<dyn MailProvider>,
    mailbox: Mailbox,
    retry: RetryPolicy,
}

impl BatchFetcher {
    pub fn new(provider: Arc<dyn MailProvider>, mailbox: Mailbox) -> Self {
        Self {
            provider,
            mailbox,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every id, returning exactly one outcome per id
    pub async fn fetch_all(
        &self,
        ids: &[MailItemId],
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Vec<FetchOutcome> {
        self.fetch_all_with_progress(ids, batch_size, inter_batch_delay, |_| {})
            .await
    }

    /// Like [`fetch_all`](Self::fetch_all), reporting progress after each batch
    pub async fn fetch_all_with_progress<F>(
        &self,
        ids: &[MailItemId],
        batch_size: usize,
        inter_batch_delay: Duration,
        mut on_batch: F,
    ) -> Vec<FetchOutcome>
    where
        F: FnMut(BatchProgress),
    {
        let batch_size = batch_size.max(1);
        let total_batches = ids.len().div_ceil(batch_size);
        let mut outcomes = Vec::with_capacity(ids.len());
        let mut progress = BatchProgress {
            batch: 0,
            total_batches,
            processed: 0,
            total: ids.len(),
            fetched: 0,
            failed: 0,
        };

        for (index, chunk) in ids.chunks(batch_size).enumerate() {
            let results = join_all(chunk.iter().map(|id| self.fetch_one(id))).await;

            for outcome in &results {
                match outcome {
                    FetchOutcome::Fetched(_) => progress.fetched += 1,
                    FetchOutcome::Failed(_) => progress.failed += 1,
                }
            }
            progress.batch = index + 1;
            progress.processed += results.len();
            outcomes.extend(results);
            on_batch(progress);

            if index + 1 < total_batches && !inter_batch_delay.is_zero() {
                tokio::time::sleep(inter_batch_delay).await;
            }
        }

        outcomes
    }

    async fn fetch_one(&self, id: &MailItemId) -> FetchOutcome {
        let result = self
            .retry
            .run(|| self.provider.get_message(&self.mailbox, id))
            .await;

        match result {
            Ok(item) => FetchOutcome::Fetched(item),
            Err(e) => {
                log::warn!("Failed to fetch message {}: {:#}", id, e);
                FetchOutcome::Failed(FetchFailure {
                    id: id.clone(),
                    kind: ErrorKind::of_remote(&e),
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::provider::InMemoryProvider;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn provider_with(count: usize) -> Arc<InMemoryProvider> {
        let provider = Arc::new(InMemoryProvider::new(UserProfile::new("me@example.com")));
        for i in 0..count {
            provider.add_item(
                MailItem::builder(format!("m{}", i))
                    .date(Utc.with_ymd_and_hms(2025, 1, 1, 0, i as u32 % 60, 0).unwrap())
                    .build(),
            );
        }
        provider
    }

    fn ids(count: usize) -> Vec<MailItemId> {
        (0..count).map(|i| MailItemId::new(format!("m{}", i))).collect()
    }

    fn fetcher(provider: Arc<InMemoryProvider>) -> BatchFetcher {
        BatchFetcher::new(provider, Mailbox::new("me@example.com", "token"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_outcome_per_id_for_any_batch_size() {
        let provider = provider_with(23);
        provider.fail_message("m4");
        provider.fail_message("m17");
        let fetcher = fetcher(provider);
        let input = ids(23);

        for batch_size in [1, 3, 8, 10, 23, 50] {
            let outcomes = fetcher
                .fetch_all(&input, batch_size, Duration::from_millis(10))
                .await;
            assert_eq!(outcomes.len(), input.len(), "batch size {}", batch_size);

            let seen: HashSet<&MailItemId> = outcomes.iter().map(FetchOutcome::id).collect();
            assert_eq!(seen.len(), input.len());

            let (items, failures) = split_outcomes(outcomes);
            assert_eq!(items.len(), 21);
            let failed: HashSet<&str> = failures.iter().map(|f| f.id.as_str()).collect();
            assert_eq!(failed, HashSet::from(["m4", "m17"]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_within_a_batch_run_concurrently() {
        let provider = provider_with(20);
        provider.set_latency(Duration::from_millis(50));
        let fetcher = fetcher(Arc::clone(&provider));

        fetcher.fetch_all(&ids(20), 8, Duration::ZERO).await;

        assert_eq!(provider.max_in_flight(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_batches_only() {
        let provider = provider_with(25);
        let fetcher = fetcher(provider);
        let start = tokio::time::Instant::now();

        fetcher
            .fetch_all(&ids(25), 10, Duration::from_millis(200))
            .await;

        // 3 batches -> 2 pauses
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_per_batch() {
        let provider = provider_with(10);
        provider.fail_message("m9");
        let fetcher = fetcher(provider);
        let mut reports = Vec::new();

        fetcher
            .fetch_all_with_progress(&ids(10), 4, Duration::from_millis(150), |p| reports.push(p))
            .await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].processed, 4);
        assert_eq!(reports[2].processed, 10);
        assert_eq!(reports[2].failed, 1);
        assert_eq!(reports[2].percent(), 100);
        assert!(reports.iter().all(|p| p.total_batches == 3));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let fetcher = fetcher(provider_with(0));
        let outcomes = fetcher.fetch_all(&[], 10, Duration::from_millis(200)).await;
        assert!(outcomes.is_empty());
    }
}

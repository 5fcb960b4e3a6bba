//! Remote retrieval: batching, retry, week decomposition, and bulk export

mod batch;
mod export;
mod range;
mod retry;

pub use batch::{BatchFetcher, BatchProgress, FetchFailure, FetchOutcome, split_outcomes};
pub use export::{ExportProgress, ExportResult, WeekStatus, WeekSummary, WeeklyExporter};
pub use range::{WeekWindow, date_query, watermark_query, weeks};
pub use retry::RetryPolicy;

//! Bounded retry with exponential backoff for transient remote errors

use anyhow::Result;
use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{ErrorKind, RateLimitedError};

/// How many times to attempt an operation before giving up
///
/// Authentication rejections are never retried. On exhaustion the last error
/// is returned so the caller can skip the unit and continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts || ErrorKind::of_remote(&e).is_fatal() => {
                    return Err(e);
                }
                Err(e) => {
                    // Throttling gets twice the usual pause
                    let pause = if e.downcast_ref::<RateLimitedError>().is_some() {
                        delay * 2
                    } else {
                        delay
                    };
                    log::debug!("Attempt {} failed, retrying: {:#}", attempt, e);
                    tokio::time::sleep(pause + Duration::from_millis(rand_jitter())).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

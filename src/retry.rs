//! Bounded retry for reads. Writes never go through here.

use crate::error::SyncError;
use crate::logging;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. The last error is returned.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    logging::info(&format!("{} succeeded on attempt {}", label, attempt));
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                logging::info(&format!(
                    "{} failed (attempt {}/{}), will retry: {}",
                    label, attempt, max_attempts, e
                ));
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

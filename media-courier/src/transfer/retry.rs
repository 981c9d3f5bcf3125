//! Flood-control retry policy for transfer calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::TransferError;

/// Retry policy applied to every individual transfer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff after a flood signal that carries no explicit wait.
    #[serde(default = "default_flood_backoff_ms")]
    pub flood_backoff_ms: u64,
    /// Backoff after an unclassified failure.
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_flood_backoff_ms() -> u64 {
    5000
}

fn default_transient_backoff_ms() -> u64 {
    2000
}

impl Default for FloodRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            flood_backoff_ms: default_flood_backoff_ms(),
            transient_backoff_ms: default_transient_backoff_ms(),
        }
    }
}

impl FloodRetryPolicy {
    /// Delay before the next attempt, or `None` if the error is not retryable.
    pub fn delay_for(&self, error: &TransferError) -> Option<Duration> {
        match error {
            TransferError::RetryAfter(wait) => Some(*wait),
            TransferError::Flood(_) => Some(Duration::from_millis(self.flood_backoff_ms)),
            TransferError::Transient(_) => Some(Duration::from_millis(self.transient_backoff_ms)),
            TransferError::Rejected(_) | TransferError::MaxRetriesExceeded { .. } => None,
        }
    }
}

/// Run `op` under `policy`, retrying flood-control and transient failures.
///
/// A rejected call fails immediately. Exhausting the attempt ceiling returns
/// [`TransferError::MaxRetriesExceeded`].
pub async fn with_flood_retry<T, F, Fut>(
    policy: &FloodRetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(delay) = policy.delay_for(&error) else {
            return Err(error);
        };

        if attempt >= max_attempts {
            warn!(
                operation,
                attempts = attempt,
                error = %error,
                "Transfer call failed, max retries exceeded"
            );
            return Err(TransferError::MaxRetriesExceeded {
                attempts: attempt,
                last: error.to_string(),
            });
        }

        debug!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transfer call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

//! Timeout and bounded retry around external provider calls.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{ProviderErrorKind, RagError, Result};

/// Run `call` under `policy`.
///
/// Each attempt is bounded by the policy timeout; an elapsed timeout becomes a
/// [`ProviderErrorKind::Timeout`] provider error. Only retryable errors are
/// retried, and never more than `max_attempts` times in total.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout(), call()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::provider(
                provider,
                ProviderErrorKind::Timeout,
                format!("{operation} timed out after {}ms", policy.timeout_ms),
            )),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    provider,
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

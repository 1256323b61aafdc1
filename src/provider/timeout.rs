//! Per-request time limit for hosting API calls.
//!
//! Calls are made exactly once. Opening a pull request is not idempotent, so
//! a repeated create after a lost response would fail with "already exists"
//! even though the first attempt worked.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::ProviderApiError;

/// Default bound on one HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Awaits `request`, failing with a transient error if it takes longer than
/// `timeout`. The request is dropped (and its connection closed) on expiry.
pub async fn bounded<T, Fut>(timeout: Duration, request: Fut) -> Result<T, ProviderApiError>
where
    Fut: Future<Output = Result<T, ProviderApiError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?timeout, "provider request timed out");
            Err(ProviderApiError::transient_without_source(format!(
                "request timed out after {timeout:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderErrorKind;

    #[tokio::test]
    async fn completed_request_passes_through() {
        let ok: Result<u32, _> = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded::<u32, _>(Duration::from_secs(1), async {
            Err(ProviderApiError::from_status(409, "conflict"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.status_code, Some(409));
    }

    #[tokio::test]
    async fn hung_request_times_out_as_transient() {
        let err = bounded::<(), _>(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind, ProviderErrorKind::Transient);
        assert!(err.message.contains("timed out"), "{err}");
    }
}

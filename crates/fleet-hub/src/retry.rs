use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::HubError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Retries an idempotent GET up to [`MAX_ATTEMPTS`] times with exponential
/// backoff (base 1s, capped at 10s) when the error is transient.
pub(crate) async fn retry_idempotent<T, F, Fut>(operation_name: &str, mut f: F) -> Result<T, HubError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HubError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && err.is_transient() => {
                let backoff = BASE_BACKOFF.saturating_mul(1 << (attempt - 1)).min(MAX_BACKOFF);
                warn!(operation = operation_name, attempt, ?backoff, error = %err, "hub_request_retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

use crate::metrics_defs::VENDOR_CALL_ATTEMPTS;
use crate::token::{AccessToken, TokenLease};
use crate::vendor::ErrCode;
use shared::histogram;
use std::future::Future;

/// One initial attempt plus three retries.
pub const MAX_ATTEMPTS: usize = 4;

/// Runs `operation` with the lease's token until the vendor stops reporting
/// an expired token or `max_attempts` is reached.
///
/// `operation` returns its result together with the vendor error code of the
/// attempt. On expiry the lease drops its token and the next attempt runs
/// with a freshly obtained one. The result of the last attempt is returned
/// whether or not it succeeded.
pub async fn with_token_retry<T, F, Fut>(
    lease: &mut TokenLease,
    max_attempts: usize,
    mut operation: F,
) -> T
where
    F: FnMut(AccessToken) -> Fut,
    Fut: Future<Output = (T, ErrCode)>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let token = lease.token().await;
        let (result, errcode) = operation(token).await;

        if lease.check(errcode).await || attempt >= max_attempts {
            if attempt >= max_attempts && errcode.is_token_expired() {
                tracing::warn!(attempts = attempt, "token still expired after final attempt");
            }
            histogram!(VENDOR_CALL_ATTEMPTS).record(attempt as f64);
            return result;
        }

        tracing::debug!(attempt, "retrying vendor call with a fresh token");
        attempt += 1;
    }
}

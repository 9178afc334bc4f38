use std::future::Future;
use std::time::Duration;

use crate::SessionError;

/// Runs a cache or store call with an upper time bound.
///
/// A call that does not finish within `limit` becomes
/// [`SessionError::Timeout`] carrying `op`.
pub(crate) async fn bounded<T, E>(
    op: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, SessionError>
where
    SessionError: From<E>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => {
            tracing::warn!(op, limit_ms = limit.as_millis() as u64, "dependency call timed out");
            Err(SessionError::Timeout(op))
        }
    }
}

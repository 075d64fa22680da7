//! Per-call timeout for provider requests.

use std::future::Future;
use std::time::Duration;

use vmstate_core::{Operation, ProviderError};

/// Await a provider call, failing with `ProviderError::Timeout` after `limit`.
pub(crate) async fn bounded<T, F>(
    operation: Operation,
    limit: Duration,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            operation,
            timeout: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: Result<(), ProviderError> = bounded(
            Operation::StopInstances,
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
        )
        .await;

        assert_eq!(
            result,
            Err(ProviderError::Timeout {
                operation: Operation::StopInstances,
                timeout: Duration::from_secs(5),
            })
        );
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = bounded(Operation::StartInstances, Duration::from_secs(5), async {
            Ok::<_, ProviderError>(7)
        })
        .await;
        assert_eq!(result, Ok(7));
    }
}

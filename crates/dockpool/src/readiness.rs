//! Waiting for a started container to report healthy.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::HealthEventStream;
use crate::error::PoolError;

/// How a health wait ended.
#[derive(Debug)]
pub enum Readiness {
    /// A `health_status: healthy` event arrived.
    Healthy,
    /// The event subscription failed or closed.
    Failed(PoolError),
    /// The caller's token fired first.
    Cancelled,
}

/// Block until `events` reports the container healthy, the subscription
/// breaks, or `cancel` fires.
///
/// Unhealthy transitions do not end the wait; the probe may still pass on a
/// later interval.
pub async fn wait_until_healthy(
    container_id: &str,
    mut events: HealthEventStream,
    cancel: &CancellationToken,
) -> Readiness {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Readiness::Cancelled,
            next = events.next() => match next {
                Some(Ok(event)) if event.is_healthy() => return Readiness::Healthy,
                Some(Ok(event)) if event.is_unhealthy() => {
                    warn!("Container {} reported unhealthy, still waiting", container_id);
                }
                Some(Ok(event)) => {
                    debug!("Container {} health event: {}", container_id, event.action);
                }
                Some(Err(e)) => return Readiness::Failed(e),
                None => return Readiness::Failed(PoolError::EventStreamClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;

    use super::*;
    use crate::engine::HealthEvent;

    fn events(actions: &[&str]) -> Vec<Result<HealthEvent, PoolError>> {
        actions
            .iter()
            .map(|a| Ok(HealthEvent::new("c1", *a)))
            .collect()
    }

    #[tokio::test]
    async fn test_healthy_event_ends_wait() {
        let stream = stream::iter(events(&[
            "health_status: starting",
            "health_status: unhealthy",
            "health_status: healthy",
        ]))
        .chain(stream::pending())
        .boxed();

        let outcome = wait_until_healthy("c1", stream, &CancellationToken::new()).await;
        assert!(matches!(outcome, Readiness::Healthy));
    }

    #[tokio::test]
    async fn test_stream_error_fails_wait() {
        let stream = stream::iter(events(&["health_status: unhealthy"]))
            .chain(stream::once(async {
                Err(PoolError::Engine("connection reset".into()))
            }))
            .boxed();

        let outcome = wait_until_healthy("c1", stream, &CancellationToken::new()).await;
        match outcome {
            Readiness::Failed(PoolError::Engine(msg)) => assert_eq!(msg, "connection reset"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_stream_fails_wait() {
        let stream = stream::iter(events(&["health_status: unhealthy"])).boxed();

        let outcome = wait_until_healthy("c1", stream, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            Readiness::Failed(PoolError::EventStreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = wait_until_healthy("c1", stream::pending().boxed(), &cancel).await;
        assert!(matches!(outcome, Readiness::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_wins_over_ready_event() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream = stream::iter(events(&["health_status: healthy"])).boxed();

        let outcome = wait_until_healthy("c1", stream, &cancel).await;
        assert!(matches!(outcome, Readiness::Cancelled));
    }
}

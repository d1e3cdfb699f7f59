use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterAdapter;
use crate::error::Error;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Recovered,
    TimedOut,
    Cancelled,
}

/// Polls a node's readiness until it reports `Ready=True`, the budget runs
/// out, or the token fires. Always probes at least once, even for a
/// zero-length budget.
pub async fn wait(
    adapter: &dyn ClusterAdapter,
    node: &str,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<WaitOutcome, Error> {
    let deadline = tokio::time::Instant::now() + budget;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
            _ = ticker.tick() => {
                if adapter.is_ready(node).await? {
                    return Ok(WaitOutcome::Recovered);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(WaitOutcome::TimedOut);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::FakeAdapter;

    #[tokio::test(start_paused = true)]
    async fn recovers_as_soon_as_the_node_reports_ready() {
        let adapter = FakeAdapter::new(1);
        let cancel = CancellationToken::new();
        let outcome = wait(&adapter, "node-a", Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_the_budget_is_exhausted() {
        let adapter = FakeAdapter::never_ready();
        let cancel = CancellationToken::new();
        let outcome = wait(&adapter, "node-a", Duration::from_secs(20), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn a_zero_budget_still_performs_one_probe() {
        let adapter = FakeAdapter::new(1);
        let cancel = CancellationToken::new();
        let outcome = wait(&adapter, "node-a", Duration::from_secs(0), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Recovered);
    }

    #[tokio::test]
    async fn cancellation_wins_over_a_still_open_budget() {
        let adapter = FakeAdapter::never_ready();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = wait(&adapter, "node-a", Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }
}

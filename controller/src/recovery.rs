use std::time::Instant;

use chrono::Utc;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterAdapter, NodeSnapshot, Readiness};
use crate::colors::{FG1, FG2};
use crate::config::Config;
use crate::metrics::ControllerMetrics;
use crate::readiness::{self, WaitOutcome};
use crate::remediation::RemediationStep;
use crate::state::{self, OverallStatus, StepStatus};

/// Decides whether a node needs recovery at all, and if so runs it through
/// the escalating pipeline one step at a time, stopping at the first step
/// whose readiness wait reports `Recovered`.
pub async fn reconcile(
    snapshot: &NodeSnapshot,
    adapter: &dyn ClusterAdapter,
    pipeline: &[RemediationStep],
    cfg: &Config,
    metrics: &ControllerMetrics,
    state: &state::Registry,
    cancel: &CancellationToken,
) {
    let node = snapshot.name.as_str();

    if snapshot.ready == Readiness::True {
        state.record(node, "initial_check", StepStatus::Skipped, OverallStatus::Idle);
        return;
    }

    let age = Utc::now()
        .signed_duration_since(snapshot.created_at)
        .to_std()
        .unwrap_or_default();
    if age < cfg.new_node_threshold() {
        state.record(node, "check_new_node", StepStatus::Skipped, OverallStatus::Idle);
        println!(
            "{} {} is {:?} old, younger than the grace window; ignoring",
            "node".color(FG2),
            node.color(FG1),
            age
        );
        return;
    }

    println!(
        "{} {} is not ready and past the grace window; starting recovery",
        "node".color(FG2),
        node.color(FG1)
    );

    let overall_start = Instant::now();
    let mut recovered = false;
    let mut cancelled = false;

    for step in pipeline {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        metrics
            .recovery_attempts
            .with_label_values(&[node, step.name])
            .inc();
        state.record(node, step.name, StepStatus::InProgress, OverallStatus::Running);

        let step_start = Instant::now();
        if let Err(e) = step.adapter.execute(snapshot, cancel).await {
            eprintln!("remediation step '{}' for {node} failed to dispatch: {e}", step.name);
        }

        match readiness::wait(adapter, node, cfg.recovery_wait_time(), cancel).await {
            Ok(WaitOutcome::Recovered) => {
                metrics
                    .recovery_successes
                    .with_label_values(&[node, step.name])
                    .inc();
                metrics
                    .recovery_step_latency
                    .with_label_values(&[node, step.name])
                    .observe(step_start.elapsed().as_secs_f64());
                state.record(node, step.name, StepStatus::Success, OverallStatus::Recovered);
                recovered = true;
                break;
            }
            Ok(WaitOutcome::TimedOut) => {
                metrics
                    .recovery_failures
                    .with_label_values(&[node, step.name])
                    .inc();
                metrics
                    .recovery_step_latency
                    .with_label_values(&[node, step.name])
                    .observe(step_start.elapsed().as_secs_f64());
                state.record(node, step.name, StepStatus::Failure, OverallStatus::Running);
            }
            Ok(WaitOutcome::Cancelled) => {
                state.record(node, step.name, StepStatus::Failure, OverallStatus::Running);
                cancelled = true;
                break;
            }
            Err(e) => {
                eprintln!("readiness check for {node} failed: {e}");
                metrics
                    .recovery_failures
                    .with_label_values(&[node, step.name])
                    .inc();
                metrics
                    .recovery_step_latency
                    .with_label_values(&[node, step.name])
                    .observe(step_start.elapsed().as_secs_f64());
                state.record(node, step.name, StepStatus::Failure, OverallStatus::Running);
            }
        }
    }

    let overall_elapsed = overall_start.elapsed();
    metrics
        .recovery_duration
        .with_label_values(&[node])
        .observe(overall_elapsed.as_secs_f64());

    if recovered {
        println!("{} {} recovered", "node".color(FG2), node.color(FG1));
        return;
    }
    if cancelled {
        eprintln!("recovery for {node} cancelled mid-pipeline");
        return;
    }

    metrics.node_downtime.with_label_values(&[node]).observe(overall_elapsed.as_secs_f64());
    metrics.manual_interventions.with_label_values(&[node]).inc();
    state.record(node, "overall_recovery", StepStatus::Failure, OverallStatus::ManualInterventionRequired);
    eprintln!(
        "{} {} exhausted every remediation step; manual intervention required",
        "node".red(),
        node.red()
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::cluster::testing::FakeAdapter;
    use crate::error::Error;
    use crate::remediation::RemediationAdapter;

    fn config() -> Config {
        Config {
            debug: false,
            namespace: "default".into(),
            metrics_port: 9090,
            insecure_skip_verify: false,
            harvester_api: "https://harvester.example".into(),
            harvester_key: "token".into(),
            harvester_namespace: "default".into(),
            rancher_api: "https://rancher.example".into(),
            rancher_key: "key".into(),
            rancher_cluster: "c-abc123".into(),
            recovery_wait_time_minutes: 1,
            drain_timeout_minutes: 60,
            recovery_delay_minutes: 10,
            new_node_threshold_minutes: 60,
            rescan_interval_minutes: 5,
        }
    }

    fn snapshot(name: &str, ready: Readiness, age: ChronoDuration) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            created_at: Utc::now() - age,
            ready,
            primary_address: Some("10.0.0.1".to_string()),
        }
    }

    struct CountingStep {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemediationAdapter for CountingStep {
        async fn execute(&self, _node: &NodeSnapshot, _cancel: &CancellationToken) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_pipeline(steps: usize) -> (Vec<RemediationStep>, Vec<Arc<AtomicUsize>>) {
        let names: &[&'static str] = &["ssh_and_reboot", "hard_reboot", "delete_via_rancher"];
        let mut pipeline = Vec::new();
        let mut counters = Vec::new();
        for name in names.iter().take(steps) {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.push(calls.clone());
            pipeline.push(RemediationStep {
                name,
                adapter: Arc::new(CountingStep { calls }),
            });
        }
        (pipeline, counters)
    }

    #[tokio::test(start_paused = true)]
    async fn ready_nodes_are_left_alone() {
        let cfg = config();
        let adapter = FakeAdapter::never_ready();
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_ready");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::True, ChronoDuration::hours(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::Idle);
        assert_eq!(record.steps["initial_check"].status, StepStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn brand_new_nodes_are_ignored() {
        let cfg = config();
        let adapter = FakeAdapter::never_ready();
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_new");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::minutes(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::Idle);
        assert_eq!(record.steps["check_new_node"].status, StepStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_the_first_step_when_readiness_returns() {
        let cfg = config();
        let adapter = FakeAdapter::new(1);
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_first_step");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::hours(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 0);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::Recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_first_step_escalates_to_the_next_one() {
        let mut cfg = config();
        cfg.recovery_wait_time_minutes = 0;
        // One probe per step's readiness wait (a zero budget still performs
        // exactly one, per the readiness waiter's own contract): the node
        // isn't ready after `ssh_and_reboot`'s probe, but is by
        // `hard_reboot`'s.
        let adapter = FakeAdapter::new(2);
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_escalation");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::hours(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::Recovered);
        assert_eq!(record.steps["ssh_and_reboot"].status, StepStatus::Failure);
        assert_eq!(record.steps["hard_reboot"].status, StepStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_every_step_requires_manual_intervention() {
        let cfg = config();
        let adapter = FakeAdapter::never_ready();
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_exhausted");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::hours(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::ManualInterventionRequired);
        assert_eq!(
            record.steps["overall_recovery"].status,
            StepStatus::Failure
        );
    }

    #[tokio::test]
    async fn a_cancellation_before_the_pipeline_starts_does_not_run_any_step() {
        let cfg = config();
        let adapter = FakeAdapter::never_ready();
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_cancel");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::hours(5));

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        assert!(state.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn a_cancellation_while_the_waiter_is_blocked_fails_the_step_and_stops_the_pipeline() {
        let cfg = config();
        let adapter = FakeAdapter::never_ready();
        let state = state::Registry::new();
        let metrics = ControllerMetrics::new("test_cancel_mid_wait");
        let (pipeline, counters) = counting_pipeline(3);
        let cancel = CancellationToken::new();
        let snap = snapshot("node-a", Readiness::False, ChronoDuration::hours(5));

        let cancel_after_some_polls = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(7)).await;
            cancel_after_some_polls.cancel();
        });

        reconcile(&snap, &adapter, &pipeline, &cfg, &metrics, &state, &cancel).await;

        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 0);
        assert_eq!(counters[2].load(Ordering::SeqCst), 0);
        let record = &state.snapshot()[0];
        assert_eq!(record.overall, OverallStatus::Running);
        assert_eq!(record.steps["ssh_and_reboot"].status, StepStatus::Failure);
    }
}

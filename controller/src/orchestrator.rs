use std::sync::Arc;

use futures::StreamExt;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterAdapter, ClusterEvent, NodeSnapshot};
use crate::colors::FG1;
use crate::config::Config;
use crate::locks;
use crate::metrics::ControllerMetrics;
use crate::recovery;
use crate::remediation::RemediationStep;
use crate::state;

/// Drives the controller's two node-discovery paths — the live watch and the
/// periodic full rescan — and funnels every discovered node through the
/// per-node lock registry into the recovery pipeline. Runs until `cancel`
/// fires.
pub async fn run(
    adapter: Arc<dyn ClusterAdapter>,
    pipeline: Arc<Vec<RemediationStep>>,
    cfg: Arc<Config>,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
    locks: locks::Registry,
    cancel: CancellationToken,
) {
    let watch_task = tokio::spawn(run_watch(
        adapter.clone(),
        pipeline.clone(),
        cfg.clone(),
        metrics,
        state.clone(),
        locks.clone(),
        cancel.clone(),
    ));
    let rescan_task = tokio::spawn(run_rescan(
        adapter,
        pipeline,
        cfg.clone(),
        metrics,
        state,
        locks,
        cancel.clone(),
    ));

    cancel.cancelled().await;
    watch_task.abort();
    rescan_task.abort();
}

fn spawn_reconcile(
    snapshot: NodeSnapshot,
    adapter: Arc<dyn ClusterAdapter>,
    pipeline: Arc<Vec<RemediationStep>>,
    cfg: Arc<Config>,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
    locks: locks::Registry,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let _guard = locks.acquire(&snapshot.name).await;
        recovery::reconcile(&snapshot, adapter.as_ref(), &pipeline, &cfg, metrics, &state, &cancel).await;
    });
}

async fn run_watch(
    adapter: Arc<dyn ClusterAdapter>,
    pipeline: Arc<Vec<RemediationStep>>,
    cfg: Arc<Config>,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
    locks: locks::Registry,
    cancel: CancellationToken,
) {
    let mut stream = adapter.watch_nodes();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => {
                match next {
                    None => break,
                    Some(Ok(ClusterEvent::Added(snapshot))) | Some(Ok(ClusterEvent::Updated(_, snapshot))) => {
                        spawn_reconcile(
                            snapshot,
                            adapter.clone(),
                            pipeline.clone(),
                            cfg.clone(),
                            metrics,
                            state.clone(),
                            locks.clone(),
                            cancel.clone(),
                        );
                    }
                    Some(Ok(ClusterEvent::Deleted(name))) => {
                        locks.forget(&name);
                    }
                    Some(Err(e)) => {
                        eprintln!("{}: {e}", "node watch error".red());
                    }
                }
            }
        }
    }
}

async fn run_rescan(
    adapter: Arc<dyn ClusterAdapter>,
    pipeline: Arc<Vec<RemediationStep>>,
    cfg: Arc<Config>,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
    locks: locks::Registry,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cfg.rescan_interval());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match adapter.list_nodes().await {
                    Ok(nodes) => {
                        println!("{} {} nodes", "rescanning".color(FG1), nodes.len());
                        for snapshot in nodes {
                            spawn_reconcile(
                                snapshot,
                                adapter.clone(),
                                pipeline.clone(),
                                cfg.clone(),
                                metrics,
                                state.clone(),
                                locks.clone(),
                                cancel.clone(),
                            );
                        }
                    }
                    Err(e) => eprintln!("periodic rescan failed to list nodes: {e}"),
                }
            }
        }
    }
}

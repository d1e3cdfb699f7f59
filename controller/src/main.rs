mod bootstrap;
mod cluster;
mod colors;
mod config;
mod error;
mod http;
mod locks;
mod metrics;
mod orchestrator;
mod readiness;
mod recovery;
mod remediation;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use bootstrap::{ClusterBootstrap, DefaultBootstrap, RancherBootstrap};
use cluster::{ClusterAdapter, KubeClusterAdapter};
use colors::{FG1, FG2};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    recovery_common::init();

    let cfg = Config::parse();
    if let Err(e) = cfg.validate() {
        eprintln!("{}", format!("configuration error: {e}").red());
        std::process::exit(1);
    }
    let cfg = Arc::new(cfg);

    println!(
        "{} {}",
        "starting node-recovery-controller".color(FG1),
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown").color(FG2),
    );
    if cfg.debug {
        println!("  namespace: {}", cfg.namespace);
        println!("  metrics port: {}", cfg.metrics_port);
        println!("  harvester api: {}", cfg.harvester_api);
        println!("  rancher api: {}", cfg.rancher_api);
    }

    let client = bootstrap_client(&cfg)
        .await
        .context("obtaining a kubernetes client")?;

    let adapter: Arc<dyn ClusterAdapter> = Arc::new(KubeClusterAdapter::new(client.clone()));
    let pipeline = Arc::new(remediation::default_pipeline(&cfg));
    let state = state::Registry::new();
    let locks = locks::Registry::new();
    let metrics = metrics::controller_metrics();

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        recovery_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    recovery_common::signal_ready();

    let http_cancel = shutdown.clone();
    let http_state = state.clone();
    let http_addr = ([0, 0, 0, 0], cfg.metrics_port).into();
    tokio::spawn(async move {
        if let Err(e) = http::run(http_addr, metrics, http_state, http_cancel).await {
            eprintln!("{}", format!("observability server stopped: {e}").red());
        }
    });

    run_with_leader_election(client, cfg, adapter, pipeline, metrics, state, locks, shutdown).await;

    println!("{}", "shut down gracefully".color(FG1));
    Ok(())
}

async fn bootstrap_client(cfg: &Config) -> Result<kube::Client> {
    let bootstrap: Box<dyn ClusterBootstrap> = if cfg.rancher_cluster.is_empty() {
        Box::new(DefaultBootstrap)
    } else {
        Box::new(RancherBootstrap::new(cfg))
    };
    Ok(bootstrap.client().await?)
}

/// Wraps the orchestrator in a lease-based leader election loop: only the
/// elected replica runs the watch/rescan/recovery machinery, and losing or
/// failing to renew leadership tears the orchestrator task down until it's
/// regained.
#[allow(clippy::too_many_arguments)]
async fn run_with_leader_election(
    client: kube::Client,
    cfg: Arc<Config>,
    adapter: Arc<dyn ClusterAdapter>,
    pipeline: Arc<Vec<remediation::RemediationStep>>,
    metrics: &'static metrics::ControllerMetrics,
    state: state::Registry,
    locks: locks::Registry,
    shutdown: CancellationToken,
) {
    let lease_namespace = cfg.namespace.clone();
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("node-recovery-controller-{}", uuid::Uuid::new_v4()));

    let leadership = LeaseLock::new(
        client,
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "node-recovery-controller-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );

    let renew_every = Duration::from_secs(5);
    let mut orchestrator_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = orchestrator_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{}", format!("leader election renew/acquire failed: {e}").red());
                if let Some(task) = orchestrator_task.take() {
                    task.abort();
                    eprintln!("aborted orchestrator due to leader election error");
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if orchestrator_task.is_none() {
                println!("{}", "acquired leadership; starting orchestrator".color(FG1));
                let task_adapter = adapter.clone();
                let task_pipeline = pipeline.clone();
                let task_cfg = cfg.clone();
                let task_state = state.clone();
                let task_locks = locks.clone();
                let task_cancel = shutdown.clone();
                orchestrator_task = Some(tokio::spawn(async move {
                    orchestrator::run(
                        task_adapter,
                        task_pipeline,
                        task_cfg,
                        metrics,
                        task_state,
                        task_locks,
                        task_cancel,
                    )
                    .await;
                }));
            }
        } else if let Some(task) = orchestrator_task.take() {
            eprintln!("{}", "lost leadership; stopping orchestrator".yellow());
            task.abort();
        }
    }
}

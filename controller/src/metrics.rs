use const_format::formatcp;
use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "node_recovery_controller";
pub const STARTUP_BANNER: &str = formatcp!("{NAMESPACE}: metrics registered");

/// Everything the controller counts and times. Deliberately excludes the
/// three rate-style gauges the original codebase declared but never
/// incremented anywhere (recovery failure rate, incident frequency, change
/// failure rate) — dead metrics aren't worth carrying forward.
pub struct ControllerMetrics {
    registry: Registry,
    pub recovery_attempts: CounterVec,
    pub recovery_successes: CounterVec,
    pub recovery_failures: CounterVec,
    pub recovery_step_latency: HistogramVec,
    pub recovery_duration: HistogramVec,
    pub node_downtime: HistogramVec,
    pub manual_interventions: CounterVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let registry = Registry::new();

        let recovery_attempts = CounterVec::new(
            Opts::new("recovery_attempts_total", "Remediation steps dispatched")
                .namespace(NAMESPACE)
                .subsystem(subsystem),
            &["node", "step"],
        )
        .expect("build recovery_attempts_total");

        let recovery_successes = CounterVec::new(
            Opts::new("recovery_successes_total", "Remediation steps that ended in readiness")
                .namespace(NAMESPACE)
                .subsystem(subsystem),
            &["node", "step"],
        )
        .expect("build recovery_successes_total");

        let recovery_failures = CounterVec::new(
            Opts::new("recovery_failures_total", "Remediation steps that timed out or errored")
                .namespace(NAMESPACE)
                .subsystem(subsystem),
            &["node", "step"],
        )
        .expect("build recovery_failures_total");

        let recovery_step_latency = HistogramVec::new(
            HistogramOpts::new(
                "recovery_step_latency_seconds",
                "Time from dispatching a step to its readiness classification",
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem)
            .buckets(prometheus::linear_buckets(1.0, 5.0, 5).unwrap()),
            &["node", "step"],
        )
        .expect("build recovery_step_latency_seconds");

        let recovery_duration = HistogramVec::new(
            HistogramOpts::new(
                "recovery_duration_seconds",
                "Time from the first escalation step to a terminal outcome",
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem)
            .buckets(prometheus::linear_buckets(10.0, 10.0, 5).unwrap()),
            &["node"],
        )
        .expect("build recovery_duration_seconds");

        let node_downtime = HistogramVec::new(
            HistogramOpts::new(
                "node_downtime_seconds",
                "Elapsed time for nodes that exhausted the entire escalation pipeline",
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem)
            .buckets(prometheus::linear_buckets(10.0, 10.0, 5).unwrap()),
            &["node"],
        )
        .expect("build node_downtime_seconds");

        let manual_interventions = CounterVec::new(
            Opts::new(
                "manual_interventions_total",
                "Nodes that exhausted the pipeline and now need a human",
            )
            .namespace(NAMESPACE)
            .subsystem(subsystem),
            &["node"],
        )
        .expect("build manual_interventions_total");

        for collector in [
            Box::new(recovery_attempts.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(recovery_successes.clone()),
            Box::new(recovery_failures.clone()),
            Box::new(recovery_step_latency.clone()),
            Box::new(recovery_duration.clone()),
            Box::new(node_downtime.clone()),
            Box::new(manual_interventions.clone()),
        ] {
            registry.register(collector).expect("register metric collector");
        }

        Self {
            registry,
            recovery_attempts,
            recovery_successes,
            recovery_failures,
            recovery_step_latency,
            recovery_duration,
            node_downtime,
            manual_interventions,
        }
    }

    /// Renders the Prometheus text exposition format for the `/metrics`
    /// endpoint.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let families = self.registry.gather();
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("encode metrics");
        String::from_utf8(buf).expect("metrics text is valid utf8")
    }
}

lazy_static! {
    static ref METRICS: ControllerMetrics = ControllerMetrics::new("recovery");
}

pub fn controller_metrics() -> &'static ControllerMetrics {
    &METRICS
}

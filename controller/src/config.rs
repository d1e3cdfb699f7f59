use std::time::Duration;

use clap::Parser;

use crate::error::Error;

/// Environment-sourced configuration for the controller. Every field is
/// settable either via CLI flag or the matching environment variable; the
/// environment is how this binary is actually configured in cluster.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Reboots, restarts, and retires nodes that stop reporting Ready")]
pub struct Config {
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    #[arg(long, env = "INSECURE_SKIP_VERIFY", default_value_t = false)]
    pub insecure_skip_verify: bool,

    #[arg(long, env = "HARVESTER_API", default_value = "")]
    pub harvester_api: String,

    #[arg(long, env = "HARVESTER_KEY", default_value = "")]
    pub harvester_key: String,

    #[arg(long, env = "HARVESTER_NAMESPACE", default_value = "")]
    pub harvester_namespace: String,

    #[arg(long, env = "RANCHER_API", default_value = "")]
    pub rancher_api: String,

    #[arg(long, env = "RANCHER_KEY", default_value = "")]
    pub rancher_key: String,

    #[arg(long, env = "RANCHER_CLUSTER", default_value = "")]
    pub rancher_cluster: String,

    #[arg(long, env = "RECOVERY_WAIT_TIME_MINUTES", default_value_t = 5)]
    pub recovery_wait_time_minutes: u64,

    #[arg(long, env = "DRAIN_TIMEOUT_MINUTES", default_value_t = 60)]
    pub drain_timeout_minutes: u64,

    /// Parsed and validated, but never consumed by a call site: the
    /// escalation pipeline runs back-to-back with no inter-step delay.
    #[arg(long, env = "RECOVERY_DELAY_MINUTES", default_value_t = 10)]
    pub recovery_delay_minutes: u64,

    #[arg(long, env = "NEW_NODE_THRESHOLD", default_value_t = 60)]
    pub new_node_threshold_minutes: u64,

    #[arg(long, env = "RESCAN_INTERVAL", default_value_t = 5)]
    pub rescan_interval_minutes: u64,
}

impl Config {
    pub fn recovery_wait_time(&self) -> Duration {
        Duration::from_secs(self.recovery_wait_time_minutes * 60)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_minutes * 60)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_minutes * 60)
    }

    pub fn new_node_threshold(&self) -> Duration {
        Duration::from_secs(self.new_node_threshold_minutes * 60)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_minutes * 60)
    }

    /// Rejects missing credentials and nonsensical durations before the
    /// controller touches the cluster. Mirrors the original's decoupled
    /// load-then-validate shape: parsing never fails on a missing value,
    /// only this step does.
    pub fn validate(&self) -> Result<(), Error> {
        let mut missing = Vec::new();
        if self.harvester_api.is_empty() {
            missing.push("HARVESTER_API");
        }
        if self.harvester_key.is_empty() {
            missing.push("HARVESTER_KEY");
        }
        if self.harvester_namespace.is_empty() {
            missing.push("HARVESTER_NAMESPACE");
        }
        if self.rancher_api.is_empty() {
            missing.push("RANCHER_API");
        }
        if self.rancher_key.is_empty() {
            missing.push("RANCHER_KEY");
        }
        if self.rancher_cluster.is_empty() {
            missing.push("RANCHER_CLUSTER");
        }
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        }

        if self.recovery_wait_time_minutes == 0 {
            return Err(Error::Configuration(
                "RECOVERY_WAIT_TIME_MINUTES must be greater than zero".into(),
            ));
        }
        if self.drain_timeout().is_zero() {
            return Err(Error::Configuration(
                "DRAIN_TIMEOUT_MINUTES must be greater than zero".into(),
            ));
        }
        if self.metrics_port == 0 {
            return Err(Error::Configuration("METRICS_PORT must be nonzero".into()));
        }

        Ok(())
    }
}

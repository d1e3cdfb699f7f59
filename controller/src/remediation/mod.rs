mod harvester;
mod rancher;
mod ssh;

pub use harvester::HarvesterRestart;
pub use rancher::RancherDelete;
pub use ssh::SshReboot;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeSnapshot;
use crate::config::Config;
use crate::error::Error;

/// One rung of the escalation ladder. Adapters dispatch their action and
/// return; they never wait for the node to come back — that's the
/// readiness waiter's job.
#[async_trait]
pub trait RemediationAdapter: Send + Sync {
    async fn execute(&self, node: &NodeSnapshot, cancel: &CancellationToken) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct RemediationStep {
    pub name: &'static str,
    pub adapter: Arc<dyn RemediationAdapter>,
}

/// The escalating remediation pipeline, in declared order: each step is
/// strictly more disruptive than the last, and the controller never
/// reorders or skips ahead in it.
pub fn default_pipeline(cfg: &Config) -> Vec<RemediationStep> {
    vec![
        RemediationStep {
            name: "ssh_and_reboot",
            adapter: Arc::new(SshReboot),
        },
        RemediationStep {
            name: "hard_reboot",
            adapter: Arc::new(HarvesterRestart::new(cfg)),
        },
        RemediationStep {
            name: "delete_via_rancher",
            adapter: Arc::new(RancherDelete::new(cfg)),
        },
    ]
}

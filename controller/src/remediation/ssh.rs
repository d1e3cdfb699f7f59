use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeSnapshot;
use crate::error::Error;

use super::RemediationAdapter;

/// Dispatches an in-guest `reboot` over SSH. The session's own exit code is
/// not consulted: a working host that drops the connection mid-reboot looks
/// identical to a clean one. Only a failure to spawn `ssh` at all is an
/// error here.
pub struct SshReboot;

#[async_trait]
impl RemediationAdapter for SshReboot {
    async fn execute(&self, node: &NodeSnapshot, cancel: &CancellationToken) -> Result<(), Error> {
        let Some(addr) = node.primary_address.as_deref() else {
            return Err(Error::UserInput(format!(
                "node '{}' has no known address for an ssh reboot",
                node.name
            )));
        };

        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(format!("root@{addr}"))
            .arg("uptime; sleep 1; reboot");

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            status = command.status() => {
                status.map_err(|source| Error::Ssh { node: node.name.clone(), source })?;
                Ok(())
            }
        }
    }
}

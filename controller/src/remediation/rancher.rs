use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeSnapshot;
use crate::config::Config;
use crate::error::Error;

use super::RemediationAdapter;

#[derive(Deserialize)]
struct MachineList {
    data: Vec<Machine>,
}

#[derive(Deserialize)]
struct Machine {
    metadata: MachineMetadata,
    spec: MachineSpec,
}

#[derive(Deserialize)]
struct MachineMetadata {
    name: String,
}

#[derive(Deserialize)]
struct MachineSpec {
    #[serde(rename = "infrastructureRef")]
    infrastructure_ref: InfrastructureRef,
}

#[derive(Deserialize)]
struct InfrastructureRef {
    name: String,
}

/// Final rung of the ladder: deletes the underlying Rancher Machine object
/// so its controller provisions a brand new node to replace the one that
/// never came back.
pub struct RancherDelete {
    client: Client,
    base_url: String,
    auth_header: String,
}

impl RancherDelete {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .danger_accept_invalid_certs(cfg.insecure_skip_verify)
            .timeout(Duration::from_secs(15))
            .build()
            .expect("build rancher http client");

        let auth_header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(cfg.rancher_key.as_bytes())
        );

        Self {
            client,
            base_url: cfg.rancher_api.trim_end_matches('/').to_string(),
            auth_header,
        }
    }

    async fn find_machine_name(&self, node: &str, cancel: &CancellationToken) -> Result<String, Error> {
        let url = format!("{}/v1/cluster.x-k8s.io.machines/fleet-default", self.base_url);
        let request = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request => result.map_err(|source| Error::Http { target: "rancher-list", source })?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus {
                target: "rancher-list",
                status,
                body,
            });
        }

        let machines: MachineList = response
            .json()
            .await
            .map_err(|source| Error::Http { target: "rancher-list", source })?;

        machines
            .data
            .into_iter()
            .find(|m| m.spec.infrastructure_ref.name == node)
            .map(|m| m.metadata.name)
            .ok_or_else(|| Error::MachineNotFound(node.to_string()))
    }
}

#[async_trait]
impl RemediationAdapter for RancherDelete {
    async fn execute(&self, node: &NodeSnapshot, cancel: &CancellationToken) -> Result<(), Error> {
        let machine_name = self.find_machine_name(&node.name, cancel).await?;

        let url = format!(
            "{}/v1/cluster.x-k8s.io.machines/fleet-default/{}",
            self.base_url, machine_name
        );
        let request = self
            .client
            .delete(&url)
            .header("Authorization", &self.auth_header)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request => result.map_err(|source| Error::Http { target: "rancher-delete", source })?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus {
                target: "rancher-delete",
                status,
                body,
            });
        }
        Ok(())
    }
}

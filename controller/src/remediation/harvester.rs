use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeSnapshot;
use crate::config::Config;
use crate::error::Error;

use super::RemediationAdapter;

/// Requests a hard power-cycle of the node's underlying VM through the
/// Harvester API, authenticated with a bearer token.
pub struct HarvesterRestart {
    client: Client,
    base_url: String,
    namespace: String,
    token: String,
}

impl HarvesterRestart {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .danger_accept_invalid_certs(cfg.insecure_skip_verify)
            .timeout(Duration::from_secs(15))
            .build()
            .expect("build harvester http client");

        Self {
            client,
            base_url: cfg.harvester_api.trim_end_matches('/').to_string(),
            namespace: cfg.harvester_namespace.clone(),
            token: cfg.harvester_key.clone(),
        }
    }
}

#[async_trait]
impl RemediationAdapter for HarvesterRestart {
    async fn execute(&self, node: &NodeSnapshot, cancel: &CancellationToken) -> Result<(), Error> {
        let url = format!(
            "{}/v1/harvester/kubevirt.io.virtualmachines/{}/{}?action=restart",
            self.base_url, self.namespace, node.name
        );

        let request = self.client.post(&url).bearer_auth(&self.token).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request => result.map_err(|source| Error::Http { target: "harvester", source })?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus {
                target: "harvester",
                status,
                body,
            });
        }
        Ok(())
    }
}

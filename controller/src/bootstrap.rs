use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use kube::Client;
use kube::config::{Kubeconfig, KubeConfigOptions};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::Config;
use crate::error::Error;

/// Narrow seam for obtaining the `kube::Client` this controller runs
/// against, so tests and alternate deployment topologies don't have to go
/// through Rancher.
#[async_trait]
pub trait ClusterBootstrap: Send + Sync {
    async fn client(&self) -> Result<Client, Error>;
}

/// The common case: run with whatever kubeconfig or in-cluster
/// service-account this process already has.
pub struct DefaultBootstrap;

#[async_trait]
impl ClusterBootstrap for DefaultBootstrap {
    async fn client(&self) -> Result<Client, Error> {
        Client::try_default().await.map_err(Error::from)
    }
}

#[derive(Deserialize)]
struct ClusterList {
    data: Vec<ClusterRecord>,
}

#[derive(Deserialize)]
struct ClusterRecord {
    id: String,
}

#[derive(Deserialize)]
struct KubeconfigResponse {
    config: String,
}

/// Obtains a `kube::Client` by asking Rancher for this controller's target
/// cluster ID, then exchanging that for a generated kubeconfig. Used when
/// the controller runs outside the cluster it manages.
pub struct RancherBootstrap {
    client: HttpClient,
    base_url: String,
    auth_header: String,
    cluster_name: String,
}

impl RancherBootstrap {
    pub fn new(cfg: &Config) -> Self {
        let client = HttpClient::builder()
            .danger_accept_invalid_certs(cfg.insecure_skip_verify)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("build rancher bootstrap http client");

        let auth_header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(cfg.rancher_key.as_bytes())
        );

        Self {
            client,
            base_url: cfg.rancher_api.trim_end_matches('/').to_string(),
            auth_header,
            cluster_name: cfg.rancher_cluster.clone(),
        }
    }

    async fn cluster_id(&self) -> Result<String, Error> {
        let url = format!("{}/v3/clusters?name={}", self.base_url, self.cluster_name);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|source| Error::Http { target: "rancher-cluster-id", source })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus { target: "rancher-cluster-id", status, body });
        }

        let list: ClusterList = response
            .json()
            .await
            .map_err(|source| Error::Http { target: "rancher-cluster-id", source })?;

        list.data
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| Error::Bootstrap(format!("no cluster named '{}' in Rancher", self.cluster_name)))
    }

    async fn kubeconfig(&self, cluster_id: &str) -> Result<String, Error> {
        let url = format!(
            "{}/v3/clusters/{}?action=generateKubeconfig",
            self.base_url, cluster_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|source| Error::Http { target: "rancher-kubeconfig", source })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus { target: "rancher-kubeconfig", status, body });
        }

        let body: KubeconfigResponse = response
            .json()
            .await
            .map_err(|source| Error::Http { target: "rancher-kubeconfig", source })?;
        Ok(body.config)
    }
}

#[async_trait]
impl ClusterBootstrap for RancherBootstrap {
    async fn client(&self) -> Result<Client, Error> {
        let cluster_id = self.cluster_id().await?;
        let kubeconfig_yaml = self.kubeconfig(&cluster_id).await?;

        let kubeconfig = Kubeconfig::from_yaml(&kubeconfig_yaml)
            .map_err(|e| Error::Bootstrap(format!("parse generated kubeconfig: {e}")))?;
        let client_config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Bootstrap(format!("build client config from kubeconfig: {e}")))?;

        Client::try_from(client_config).map_err(Error::from)
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Node as KubeNode, Pod};
use kube::api::{EvictParams, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    True,
    False,
    Unknown,
}

/// A point-in-time view of a node, trimmed to what the recovery pipeline
/// actually consults.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub ready: Readiness,
    pub primary_address: Option<String>,
}

impl NodeSnapshot {
    fn from_node(node: &KubeNode) -> Self {
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .map(|c| match c.status.as_str() {
                "True" => Readiness::True,
                "False" => Readiness::False,
                _ => Readiness::Unknown,
            })
            .unwrap_or(Readiness::Unknown);

        let primary_address = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addrs| {
                addrs
                    .iter()
                    .find(|a| a.type_ == "InternalIP")
                    .or_else(|| addrs.first())
            })
            .map(|a| a.address.clone());

        let created_at = node
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);

        NodeSnapshot {
            name: node.name_any(),
            created_at,
            ready,
            primary_address,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClusterEvent {
    Added(NodeSnapshot),
    Updated(NodeSnapshot, NodeSnapshot),
    Deleted(String),
}

/// The controller's only point of contact with the cluster. Kept narrow and
/// mockable so the recovery pipeline can be exercised against a fake.
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error>;
    fn watch_nodes(&self) -> BoxStream<'static, Result<ClusterEvent, Error>>;
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, Error>;
    async fn is_ready(&self, name: &str) -> Result<bool, Error>;
    async fn cordon(&self, name: &str, cordon: bool) -> Result<(), Error>;
    async fn drain(&self, name: &str, timeout: Duration) -> Result<(), Error>;
}

pub struct KubeClusterAdapter {
    client: Client,
    nodes: Api<KubeNode>,
}

impl KubeClusterAdapter {
    pub fn new(client: Client) -> Self {
        let nodes = Api::all(client.clone());
        Self { client, nodes }
    }
}

#[async_trait]
impl ClusterAdapter for KubeClusterAdapter {
    async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error> {
        let list = self.nodes.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(NodeSnapshot::from_node).collect())
    }

    fn watch_nodes(&self) -> BoxStream<'static, Result<ClusterEvent, Error>> {
        let cache: Arc<Mutex<HashMap<String, NodeSnapshot>>> = Arc::new(Mutex::new(HashMap::new()));
        watcher::watcher(self.nodes.clone(), watcher::Config::default())
            .filter_map(move |event| {
                let cache = cache.clone();
                async move {
                    match event {
                        Ok(Event::InitApply(node)) | Ok(Event::Apply(node)) => {
                            let snapshot = NodeSnapshot::from_node(&node);
                            let prev = cache
                                .lock()
                                .unwrap()
                                .insert(snapshot.name.clone(), snapshot.clone());
                            Some(Ok(match prev {
                                Some(prev) => ClusterEvent::Updated(prev, snapshot),
                                None => ClusterEvent::Added(snapshot),
                            }))
                        }
                        Ok(Event::Delete(node)) => {
                            let name = node.name_any();
                            cache.lock().unwrap().remove(&name);
                            Some(Ok(ClusterEvent::Deleted(name)))
                        }
                        Ok(Event::Init) | Ok(Event::InitDone) => None,
                        Err(source) => Some(Err(Error::from(source))),
                    }
                }
            })
            .boxed()
    }

    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, Error> {
        let node = self.nodes.get(name).await?;
        Ok(NodeSnapshot::from_node(&node))
    }

    async fn is_ready(&self, name: &str) -> Result<bool, Error> {
        Ok(self.get_node(name).await?.ready == Readiness::True)
    }

    async fn cordon(&self, name: &str, cordon: bool) -> Result<(), Error> {
        let patch = serde_json::json!({ "spec": { "unschedulable": cordon } });
        self.nodes
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn drain(&self, name: &str, timeout: Duration) -> Result<(), Error> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let on_node = ListParams::default().fields(&format!("spec.nodeName={name}"));

        let resident = pods.list(&on_node).await?;
        for pod in &resident.items {
            let pod_name = pod.name_any();
            if let Err(e) = pods.evict(&pod_name, &EvictParams::default()).await {
                eprintln!("failed to evict pod '{pod_name}' from node '{name}': {e}");
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let remaining = pods.list(&on_node).await?;
            if remaining.items.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;

    /// A `ClusterAdapter` whose readiness for a given node flips to `true`
    /// after a configurable number of polls, used to exercise the readiness
    /// waiter and the recovery pipeline without a real cluster.
    pub struct FakeAdapter {
        pub ready_after_polls: usize,
        polls: AtomicUsize,
    }

    impl FakeAdapter {
        pub fn new(ready_after_polls: usize) -> Self {
            Self {
                ready_after_polls,
                polls: AtomicUsize::new(0),
            }
        }

        pub fn never_ready() -> Self {
            Self::new(usize::MAX)
        }
    }

    #[async_trait]
    impl ClusterAdapter for FakeAdapter {
        async fn list_nodes(&self) -> Result<Vec<NodeSnapshot>, Error> {
            Ok(Vec::new())
        }

        fn watch_nodes(&self) -> BoxStream<'static, Result<ClusterEvent, Error>> {
            stream::empty().boxed()
        }

        async fn get_node(&self, name: &str) -> Result<NodeSnapshot, Error> {
            Ok(NodeSnapshot {
                name: name.to_string(),
                created_at: Utc::now(),
                ready: Readiness::Unknown,
                primary_address: Some("10.0.0.1".to_string()),
            })
        }

        async fn is_ready(&self, _name: &str) -> Result<bool, Error> {
            let count = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(count + 1 >= self.ready_after_polls)
        }

        async fn cordon(&self, _name: &str, _cordon: bool) -> Result<(), Error> {
            Ok(())
        }

        async fn drain(&self, _name: &str, _timeout: Duration) -> Result<(), Error> {
            Ok(())
        }
    }
}

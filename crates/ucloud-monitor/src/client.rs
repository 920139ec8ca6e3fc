//! Cluster access for the monitor

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use ucloud_common::kube_utils::{ignore_not_found, with_deadline, GET_DEADLINE, MUTATE_DEADLINE};
use ucloud_common::tracker::ResourceTracker;
use ucloud_common::{Error, JOB_ID_LABEL};

/// Cluster calls made by the monitor
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitorKubeClient: Send + Sync {
    /// Every live pod carrying a job label
    async fn list_pods(&self) -> Result<Vec<Pod>, Error>;

    /// Delete a pod; a missing pod is success
    async fn delete_pod(&self, name: &str) -> Result<(), Error>;

    /// Delete a service; a missing service is success
    async fn delete_service(&self, name: &str) -> Result<(), Error>;

    /// Delete a network policy; a missing policy is success
    async fn delete_network_policy(&self, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
///
/// Reads pods from a [`ResourceTracker`] when one is attached, otherwise
/// lists them from the API server.
pub struct MonitorKubeClientImpl {
    client: Client,
    namespace: String,
    pods: Option<ResourceTracker<Pod>>,
}

impl MonitorKubeClientImpl {
    /// Create a client acting in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            pods: None,
        }
    }

    /// Serve pod listings from a tracker
    pub fn with_tracker(mut self, tracker: ResourceTracker<Pod>) -> Self {
        self.pods = Some(tracker);
        self
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl MonitorKubeClient for MonitorKubeClientImpl {
    async fn list_pods(&self) -> Result<Vec<Pod>, Error> {
        if let Some(tracker) = &self.pods {
            return Ok(tracker.snapshot().await);
        }
        let api: Api<Pod> = self.api();
        let list = with_deadline(
            "list pods",
            GET_DEADLINE,
            api.list(&ListParams::default().labels(JOB_ID_LABEL)),
        )
        .await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = self.api();
        ignore_not_found(
            with_deadline("delete pod", MUTATE_DEADLINE, api.delete(name, &DeleteParams::default()))
                .await
                .map(|_| ()),
        )
    }

    async fn delete_service(&self, name: &str) -> Result<(), Error> {
        let api: Api<Service> = self.api();
        ignore_not_found(
            with_deadline(
                "delete service",
                MUTATE_DEADLINE,
                api.delete(name, &DeleteParams::default()),
            )
            .await
            .map(|_| ()),
        )
    }

    async fn delete_network_policy(&self, name: &str) -> Result<(), Error> {
        let api: Api<NetworkPolicy> = self.api();
        ignore_not_found(
            with_deadline(
                "delete network policy",
                MUTATE_DEADLINE,
                api.delete(name, &DeleteParams::default()),
            )
            .await
            .map(|_| ()),
        )
    }
}

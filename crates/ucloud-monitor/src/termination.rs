//! Deleting every cluster object belonging to a job
//!
//! Termination is the cleanup path for every exit: normal completion,
//! expiry, orphans, and stopped integrated applications. Objects that are
//! already gone count as deleted, so a crashed termination is simply run
//! again on a later pass.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use ucloud_common::naming::{
    firewall_name, ip_service_name, service_name, ssh_service_name, sync_service_name,
};
use ucloud_common::ports::PortAllocator;
use ucloud_common::Error;

use crate::client::MonitorKubeClient;

/// Deletes a job's objects and returns its ports to their pools
pub struct Terminator {
    client: Arc<dyn MonitorKubeClient>,
    allocators: Vec<Arc<PortAllocator>>,
}

impl Terminator {
    /// Create a terminator
    pub fn new(client: Arc<dyn MonitorKubeClient>) -> Self {
        Self {
            client,
            allocators: Vec::new(),
        }
    }

    /// Release ports recorded under this allocator's annotation
    pub fn with_allocator(mut self, allocator: Arc<PortAllocator>) -> Self {
        self.allocators.push(allocator);
        self
    }

    /// Delete every object of `job_id`, given its live pods
    ///
    /// All deletions are attempted. The first failure is returned after the
    /// rest have run.
    pub async fn terminate(&self, job_id: &str, pods: &[&Pod]) -> Result<(), Error> {
        let mut first_error = None;
        let mut record = |result: Result<(), Error>, name: &str| {
            if let Err(e) = result {
                warn!(job_id, name, error = %e, "failed to delete object");
                first_error.get_or_insert(e);
            }
        };

        for pod in pods {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            record(self.client.delete_pod(name).await, name);
            self.release_ports(pod);
        }

        for name in [
            service_name(job_id),
            ssh_service_name(job_id),
            ip_service_name(job_id),
            sync_service_name(job_id),
        ] {
            record(self.client.delete_service(&name).await, &name);
        }

        let policy = firewall_name(job_id);
        record(self.client.delete_network_policy(&policy).await, &policy);

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(job_id, pods = pods.len(), "terminated job");
                Ok(())
            }
        }
    }

    fn release_ports(&self, pod: &Pod) {
        let Some(annotations) = pod.metadata.annotations.as_ref() else {
            return;
        };
        for allocator in &self.allocators {
            if let Some(port) = annotations
                .get(allocator.annotation())
                .and_then(|raw| raw.parse::<u16>().ok())
            {
                allocator.release(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMonitorKubeClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use ucloud_common::SSH_PORT_ANNOTATION;

    fn pod(name: &str, ssh_port: Option<u16>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: ssh_port.map(|p| {
                    BTreeMap::from([(SSH_PORT_ANNOTATION.to_string(), p.to_string())])
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deletes_every_object_and_releases_ports() {
        let mut client = MockMonitorKubeClient::new();
        client.expect_delete_pod().times(2).returning(|_| Ok(()));
        client
            .expect_delete_service()
            .withf(|name| {
                matches!(
                    name.to_string().as_str(),
                    "j-9" | "j-9-ssh" | "j-9-ip" | "j-9-sync"
                )
            })
            .times(4)
            .returning(|_| Ok(()));
        client
            .expect_delete_network_policy()
            .withf(|name| name.to_string() == "policy-9")
            .times(1)
            .returning(|_| Ok(()));

        let ssh = Arc::new(PortAllocator::new("ssh", SSH_PORT_ANNOTATION, 2000, 2010));
        let first = pod("j-9-job-0", Some(2005));
        ssh.rebuild([&first]);
        assert!(ssh.is_used(2005));

        let terminator = Terminator::new(Arc::new(client)).with_allocator(ssh.clone());
        let second = pod("j-9-job-1", None);
        terminator.terminate("9", &[&first, &second]).await.unwrap();

        assert!(!ssh.is_used(2005));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_deletions() {
        let mut client = MockMonitorKubeClient::new();
        client
            .expect_delete_pod()
            .times(1)
            .returning(|_| Err(Error::timeout("delete pod", std::time::Duration::from_secs(15))));
        client.expect_delete_service().times(4).returning(|_| Ok(()));
        client
            .expect_delete_network_policy()
            .times(1)
            .returning(|_| Ok(()));

        let terminator = Terminator::new(Arc::new(client));
        let err = terminator
            .terminate("9", &[&pod("j-9-job-0", None)])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_job_without_pods_still_removes_services() {
        let mut client = MockMonitorKubeClient::new();
        client.expect_delete_pod().never();
        client.expect_delete_service().times(4).returning(|_| Ok(()));
        client
            .expect_delete_network_policy()
            .times(1)
            .returning(|_| Ok(()));

        Terminator::new(Arc::new(client))
            .terminate("9", &[])
            .await
            .unwrap();
    }
}

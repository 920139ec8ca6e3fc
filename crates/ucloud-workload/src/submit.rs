//! Submission of compiled objects to the cluster
//!
//! Objects are created in a fixed order: pod, then (rank 0 only) the network
//! policy, the headless service, the SSH and public IP services and any
//! services of the extension. The job objects carry an owner reference to the
//! created pod so the cluster garbage collects them with it.
//!
//! A rank whose pod already exists is left alone. Ports reserved during
//! compilation are returned when no pod is created; once the pod exists
//! nothing is rolled back and leftovers are for the termination path.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use ucloud_common::kube_utils::{not_found_as_none, with_deadline, GET_DEADLINE, MUTATE_DEADLINE};
use ucloud_common::model::Job;
use ucloud_common::ports::PortAllocator;
use ucloud_common::{Error, FIELD_MANAGER};

use crate::compiled::CompiledJob;
use crate::extension::WorkloadExtension;

/// Cluster calls made when submitting a compiled job
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadKubeClient: Send + Sync {
    /// Fetch a pod, `None` when it does not exist
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error>;

    /// Create a pod, returning it as stored by the cluster
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Create a network policy
    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), Error>;

    /// Create a service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Apply a JSON patch to an existing network policy
    async fn patch_network_policy(&self, name: &str, patch: &json_patch::Patch)
        -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct WorkloadKubeClientImpl {
    client: Client,
    namespace: String,
}

impl WorkloadKubeClientImpl {
    /// Create a client acting in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl WorkloadKubeClient for WorkloadKubeClientImpl {
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        with_deadline("get pod", GET_DEADLINE, async move {
            not_found_as_none(api.get(name).await)
        })
        .await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        with_deadline("create pod", MUTATE_DEADLINE, api.create(&Self::post_params(), pod)).await
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<(), Error> {
        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), &self.namespace);
        with_deadline(
            "create network policy",
            MUTATE_DEADLINE,
            api.create(&Self::post_params(), policy),
        )
        .await?;
        Ok(())
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        with_deadline(
            "create service",
            MUTATE_DEADLINE,
            api.create(&Self::post_params(), service),
        )
        .await?;
        Ok(())
    }

    async fn patch_network_policy(
        &self,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<(), Error> {
        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        with_deadline(
            "patch network policy",
            MUTATE_DEADLINE,
            api.patch(name, &params, &Patch::<()>::Json(patch.clone())),
        )
        .await?;
        Ok(())
    }
}

/// Outcome of a submission
#[derive(Debug, Default)]
pub struct Submission {
    /// The pod as stored by the cluster
    pub pod: Option<Pod>,
    /// Whether the pod already existed, in which case nothing was created
    pub existing: bool,
    /// Names of every object created, in creation order
    pub created: Vec<String>,
    /// Failures, in the order they happened
    pub errors: Vec<Error>,
}

impl Submission {
    /// Whether every object was created and every peer patched
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse the failures into a single error
    ///
    /// A single failure is returned as is so its classification survives.
    pub fn into_result(mut self) -> Result<Vec<String>, Error> {
        match self.errors.len() {
            0 => Ok(self.created),
            1 => Err(self.errors.remove(0)),
            _ => {
                let message = self
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(Error::internal_with_context("submit", message))
            }
        }
    }
}

fn owner_reference(pod: &Pod) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: Pod::api_version(&()).to_string(),
        kind: Pod::kind(&()).to_string(),
        name: pod.metadata.name.clone()?,
        uid: pod.metadata.uid.clone()?,
        ..Default::default()
    })
}

fn set_owner<K: Resource>(object: &mut K, owner: &Option<OwnerReference>) {
    if let Some(owner) = owner {
        object
            .meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner.clone());
    }
}

/// Return the ports reserved for a pod that will not be created
fn release_reserved(
    pod: &Pod,
    ssh_port: Option<u16>,
    ssh_ports: Option<&PortAllocator>,
    extension: Option<&dyn WorkloadExtension>,
) {
    if let (Some(port), Some(ports)) = (ssh_port, ssh_ports) {
        ports.release(port);
    }
    if let Some(ext) = extension {
        ext.release(pod);
    }
}

/// Create the compiled objects of one rank
///
/// Stops creating objects at the first failure. Peer policies are patched
/// regardless, since they are independent of this job's objects. `ssh_ports`
/// is the allocator the compiler drew the SSH port from.
pub async fn submit(
    client: &dyn WorkloadKubeClient,
    job: &Job,
    compiled: CompiledJob,
    extension: Option<&dyn WorkloadExtension>,
    ssh_ports: Option<&PortAllocator>,
) -> Submission {
    let mut submission = Submission::default();
    let CompiledJob {
        job_id,
        rank,
        pod,
        firewall,
        service,
        ssh_service,
        ip_service,
        peer_patches,
        ssh_port,
    } = compiled;

    // A failed lookup is not fatal, creation reports a real conflict
    match client.get_pod(&pod.name_any()).await {
        Ok(Some(existing)) => {
            debug!(job_id = %job_id, rank, "pod already exists, not submitting");
            release_reserved(&pod, ssh_port, ssh_ports, extension);
            submission.pod = Some(existing);
            submission.existing = true;
            return submission;
        }
        Ok(None) => {}
        Err(e) => debug!(job_id = %job_id, rank, error = %e, "could not look up pod"),
    }

    let pod = match client.create_pod(&pod).await {
        Ok(created) => created,
        Err(e) => {
            warn!(job_id = %job_id, rank, error = %e, "failed to create pod");
            release_reserved(&pod, ssh_port, ssh_ports, extension);
            submission.errors.push(e);
            return submission;
        }
    };
    submission.created.push(pod.name_any());
    let owner = owner_reference(&pod);

    if let Some(mut policy) = firewall {
        set_owner(&mut policy, &owner);
        if let Some(ext) = extension {
            ext.mutate_network_policy(job, &mut policy, &pod);
        }
        match client.create_network_policy(&policy).await {
            Ok(()) => submission.created.push(policy.name_any()),
            Err(e) => submission.errors.push(e),
        }
    }

    let mut services = Vec::new();
    if let Some(mut svc) = service {
        if let Some(ext) = extension {
            ext.mutate_service(job, &mut svc, &pod);
        }
        services.push(svc);
    }
    services.extend(ssh_service);
    services.extend(ip_service);
    if rank == 0 {
        if let Some(ext) = extension {
            services.extend(ext.extra_services(job, &pod));
        }
    }

    for mut svc in services {
        if !submission.errors.is_empty() {
            break;
        }
        set_owner(&mut svc, &owner);
        match client.create_service(&svc).await {
            Ok(()) => submission.created.push(svc.name_any()),
            Err(e) => submission.errors.push(e),
        }
    }

    for patch in peer_patches {
        match client
            .patch_network_policy(&patch.policy_name, &patch.patch)
            .await
        {
            Ok(()) => debug!(
                job_id = %job_id,
                peer = %patch.peer_job_id,
                "extended peer network policy"
            ),
            Err(e) => {
                warn!(job_id = %job_id, peer = %patch.peer_job_id, error = %e, "failed to extend peer network policy");
                submission.errors.push(e);
            }
        }
    }

    submission.pod = Some(pod);
    if submission.is_complete() {
        info!(job_id = %job_id, rank, objects = submission.created.len(), "submitted job");
    } else {
        warn!(
            job_id = %job_id,
            rank,
            created = ?submission.created,
            failures = submission.errors.len(),
            "partially submitted job, leftovers are removed on termination"
        );
    }
    submission
}

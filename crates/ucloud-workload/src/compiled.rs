//! Compiled job output types

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;

use crate::policy::PeerPatch;

/// Everything needed to run one rank of a job
///
/// Only rank 0 carries the job-wide objects.
#[derive(Clone, Debug)]
pub struct CompiledJob {
    /// Job id
    pub job_id: String,
    /// Rank this output was compiled for
    pub rank: u32,
    /// The workload
    pub pod: Pod,
    /// Job network policy (rank 0)
    pub firewall: Option<NetworkPolicy>,
    /// Headless service (rank 0)
    pub service: Option<Service>,
    /// SSH service (rank 0, when SSH was granted)
    pub ssh_service: Option<Service>,
    /// Public IP service (rank 0, when a public IP is bound)
    pub ip_service: Option<Service>,
    /// Appends for already-running peers' policies (rank 0)
    pub peer_patches: Vec<PeerPatch>,
    /// SSH port reserved for this job
    pub ssh_port: Option<u16>,
}

impl CompiledJob {
    /// Every service in creation order
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.service
            .iter()
            .chain(self.ssh_service.iter())
            .chain(self.ip_service.iter())
    }

    /// Number of objects submission will create
    pub fn object_count(&self) -> usize {
        1 + usize::from(self.firewall.is_some()) + self.services().count()
    }
}

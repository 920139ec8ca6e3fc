//! Compile-time extension points
//!
//! Integrated applications attach to the ordinary compile and submit path
//! through this trait. The pod hook runs during compilation. The service and
//! policy hooks run during submission, once the pod exists. When compilation
//! or pod creation fails after the pod hook ran, the release hook runs.

use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;

use ucloud_common::model::Job;

use crate::CompilationError;

/// Hooks applied to the objects compiled for one job
pub trait WorkloadExtension: Send + Sync {
    /// Name recorded in the application-name annotation
    fn name(&self) -> &str;

    /// Configuration etag recorded on the pod, if the extension is versioned
    fn etag(&self) -> Option<&str> {
        None
    }

    /// Adjust the pod before it is created
    fn mutate_pod(&self, job: &Job, rank: u32, pod: &mut Pod) -> Result<(), CompilationError>;

    /// Adjust the headless service before it is created
    fn mutate_service(&self, _job: &Job, _service: &mut Service, _pod: &Pod) {}

    /// Adjust the job's network policy before it is created
    fn mutate_network_policy(&self, _job: &Job, _policy: &mut NetworkPolicy, _pod: &Pod) {}

    /// Services of its own, created after the job's services
    fn extra_services(&self, _job: &Job, _pod: &Pod) -> Vec<Service> {
        Vec::new()
    }

    /// Return whatever [`mutate_pod`](Self::mutate_pod) reserved for a pod
    /// that will never exist
    fn release(&self, _pod: &Pod) {}
}

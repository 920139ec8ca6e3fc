//! The integrated application capability set

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;

use ucloud_common::model::Job;
use ucloud_workload::{CompilationError, WorkloadExtension};

use crate::config::{IAppConfig, IAppSettings};
use crate::error::IAppError;

/// A pluggable long-running application attached to a job by configuration
#[async_trait]
pub trait IntegratedApplication: Send + Sync {
    /// Registry key, also the product category of the jobs it runs as
    fn name(&self) -> &'static str;

    /// Reject settings that can never work
    fn validate_configuration(&self, job: &Job, settings: &IAppSettings) -> Result<(), IAppError>;

    /// Settings used when the user has not configured anything
    fn default_configuration(&self, job: &Job) -> IAppSettings;

    /// Settings after a reset, doing any cleanup a reset implies
    async fn reset_configuration(
        &self,
        job: &Job,
        current: &IAppSettings,
    ) -> Result<IAppSettings, IAppError>;

    /// Whether the application should currently have a workload
    fn should_run(&self, job: &Job, config: &IAppConfig) -> bool;

    /// Turn the compiled job pod into the application's pod
    fn mutate_pod(
        &self,
        job: &Job,
        config: &IAppConfig,
        rank: u32,
        pod: &mut Pod,
    ) -> Result<(), CompilationError>;

    /// Adjust the job's headless service
    fn mutate_service(&self, _job: &Job, _config: &IAppConfig, _service: &mut Service, _pod: &Pod) {
    }

    /// Adjust the job's network policy
    fn mutate_network_policy(
        &self,
        _job: &Job,
        _config: &IAppConfig,
        _policy: &mut NetworkPolicy,
        _pod: &Pod,
    ) {
    }

    /// Services the application needs besides the job's own
    fn extra_services(&self, _job: &Job, _config: &IAppConfig, _pod: &Pod) -> Vec<Service> {
        Vec::new()
    }

    /// Return what `mutate_pod` reserved when the pod is never created
    fn release(&self, _pod: &Pod) {}

    /// Called once per monitor pass with every live pod, before any decisions
    fn before_monitor_pass(&self, _pods: &[Pod]) {}
}

/// A handler bound to one stored configuration, usable by the compiler
pub struct IAppExtension<'a> {
    handler: &'a dyn IntegratedApplication,
    config: &'a IAppConfig,
}

impl<'a> IAppExtension<'a> {
    /// Bind `handler` to `config`
    pub fn new(handler: &'a dyn IntegratedApplication, config: &'a IAppConfig) -> Self {
        Self { handler, config }
    }
}

impl WorkloadExtension for IAppExtension<'_> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn etag(&self) -> Option<&str> {
        Some(&self.config.etag)
    }

    fn mutate_pod(&self, job: &Job, rank: u32, pod: &mut Pod) -> Result<(), CompilationError> {
        self.handler.mutate_pod(job, self.config, rank, pod)
    }

    fn mutate_service(&self, job: &Job, service: &mut Service, pod: &Pod) {
        self.handler.mutate_service(job, self.config, service, pod);
    }

    fn mutate_network_policy(&self, job: &Job, policy: &mut NetworkPolicy, pod: &Pod) {
        self.handler
            .mutate_network_policy(job, self.config, policy, pod);
    }

    fn extra_services(&self, job: &Job, pod: &Pod) -> Vec<Service> {
        self.handler.extra_services(job, self.config, pod)
    }

    fn release(&self, pod: &Pod) {
        self.handler.release(pod);
    }
}

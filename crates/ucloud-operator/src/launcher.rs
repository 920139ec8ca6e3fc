//! Compiles and submits integrated application workloads

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use ucloud_common::collaborators::PathResolver;
use ucloud_common::config::ComputeConfig;
use ucloud_common::model::Job;
use ucloud_common::ports::PortAllocator;
use ucloud_common::Error;
use ucloud_iapp::{IAppConfig, IAppError, IAppExtension, IAppRegistry};
use ucloud_monitor::IAppLauncher;
use ucloud_workload::{submit, JobCompiler, WorkloadKubeClient};

/// Launcher submitting every rank of the job to the cluster
pub struct ClusterLauncher {
    config: Arc<ComputeConfig>,
    registry: IAppRegistry,
    resolver: Arc<dyn PathResolver>,
    client: Arc<dyn WorkloadKubeClient>,
    ssh_ports: Option<Arc<PortAllocator>>,
}

impl ClusterLauncher {
    /// Create a launcher
    pub fn new(
        config: Arc<ComputeConfig>,
        registry: IAppRegistry,
        resolver: Arc<dyn PathResolver>,
        client: Arc<dyn WorkloadKubeClient>,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
            client,
            ssh_ports: None,
        }
    }

    /// Allocate SSH ports from `ports`
    pub fn with_ssh_ports(mut self, ports: Arc<PortAllocator>) -> Self {
        self.ssh_ports = Some(ports);
        self
    }
}

#[async_trait]
impl IAppLauncher for ClusterLauncher {
    async fn launch(&self, job: &Job, config: &IAppConfig) -> Result<(), Error> {
        let handler = self
            .registry
            .get(&config.app_name)
            .ok_or_else(|| IAppError::UnknownApplication {
                name: config.app_name.clone(),
            })?;
        let extension = IAppExtension::new(handler.as_ref(), config);

        for rank in 0..job.specification.replicas {
            let mut compiler =
                JobCompiler::new(job, rank, &self.config, self.resolver.as_ref())
                    .with_extension(&extension);
            if let Some(ports) = &self.ssh_ports {
                compiler = compiler.with_ssh_ports(ports);
            }
            let compiled = compiler.compile()?;
            submit(
                self.client.as_ref(),
                job,
                compiled,
                Some(&extension),
                self.ssh_ports.as_deref(),
            )
            .await
            .into_result()?;
        }

        info!(job_id = %job.id, app = %config.app_name, replicas = job.specification.replicas, "submitted integrated application");
        Ok(())
    }
}

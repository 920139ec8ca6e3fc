//! Sync daemon integrated application
//!
//! The daemon runs as the job's only container with every synchronized
//! folder mounted under `/mnt/sync/<n>`. It listens on a port allocated from
//! the configured range, exposed on the configured address through a service
//! of its own and opened from anywhere in the job's network policy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerPort, EnvVar, Pod, Service, VolumeMount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use tracing::{debug, info};

use ucloud_common::collaborators::{PathResolver, TaskEngine, TaskSpecification};
use ucloud_common::config::SyncthingFeature;
use ucloud_common::model::{Job, PortRange};
use ucloud_common::ports::PortAllocator;
use ucloud_common::SYNCTHING_PORT_ANNOTATION;
use ucloud_workload::mounts::{sub_path_of, FILESYSTEM_VOLUME};
use ucloud_workload::policy::{world_rule, Protocol, WorldPort};
use ucloud_workload::services::sync_service;
use ucloud_workload::CompilationError;

use crate::config::{IAppConfig, IAppSettings, SyncthingSettings};
use crate::error::IAppError;
use crate::handler::IntegratedApplication;

/// Registry key
pub const APP_NAME: &str = "syncthing";

/// Parent directory of the synchronized folders inside the container
pub const SYNC_ROOT: &str = "/mnt/sync";

/// Sync daemon handler
pub struct Syncthing {
    feature: SyncthingFeature,
    image: String,
    resolver: Arc<dyn PathResolver>,
    ports: Arc<PortAllocator>,
    tasks: Option<Arc<dyn TaskEngine>>,
    primed: AtomicBool,
}

impl Syncthing {
    /// Create the handler
    pub fn new(
        feature: SyncthingFeature,
        image: impl Into<String>,
        resolver: Arc<dyn PathResolver>,
        ports: Arc<PortAllocator>,
    ) -> Self {
        Self {
            feature,
            image: image.into(),
            resolver,
            ports,
            tasks: None,
            primed: AtomicBool::new(false),
        }
    }

    /// Hand reset cleanup to a task engine
    pub fn with_tasks(mut self, tasks: Arc<dyn TaskEngine>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    fn settings<'c>(config: &'c IAppConfig) -> Option<&'c SyncthingSettings> {
        match &config.settings {
            IAppSettings::Syncthing(s) => Some(s),
            _ => None,
        }
    }

    fn port_of(pod: &Pod) -> Option<u16> {
        pod.metadata
            .annotations
            .as_ref()?
            .get(SYNCTHING_PORT_ANNOTATION)?
            .parse()
            .ok()
    }
}

#[async_trait]
impl IntegratedApplication for Syncthing {
    fn name(&self) -> &'static str {
        APP_NAME
    }

    fn validate_configuration(&self, job: &Job, settings: &IAppSettings) -> Result<(), IAppError> {
        let IAppSettings::Syncthing(settings) = settings else {
            return Err(IAppError::invalid(APP_NAME, &job.id, "expected syncthing settings"));
        };
        if !self.feature.ports.enabled {
            return Err(IAppError::Disabled {
                app: APP_NAME.to_string(),
            });
        }

        for folder in &settings.folders {
            if self.resolver.virtual_to_internal(&folder.ucloud_path).is_none() {
                return Err(IAppError::invalid(
                    APP_NAME,
                    &job.id,
                    format!("unknown folder '{}'", folder.ucloud_path),
                ));
            }
        }

        let mut seen = HashSet::new();
        for device in &settings.devices {
            if device.device_id.trim().is_empty() {
                return Err(IAppError::invalid(APP_NAME, &job.id, "empty device id"));
            }
            if !seen.insert(device.device_id.as_str()) {
                return Err(IAppError::invalid(
                    APP_NAME,
                    &job.id,
                    format!("device '{}' is listed twice", device.device_id),
                ));
            }
        }
        Ok(())
    }

    fn default_configuration(&self, _job: &Job) -> IAppSettings {
        IAppSettings::Syncthing(SyncthingSettings::default())
    }

    async fn reset_configuration(
        &self,
        job: &Job,
        current: &IAppSettings,
    ) -> Result<IAppSettings, IAppError> {
        if let (Some(tasks), IAppSettings::Syncthing(settings)) = (&self.tasks, current) {
            if !settings.folders.is_empty() {
                let task_id = tasks
                    .register_task(TaskSpecification {
                        title: "Resetting synchronization".to_string(),
                        operation: "syncthing-reset".to_string(),
                        paths: settings.folders.iter().map(|f| f.ucloud_path.clone()).collect(),
                        owner: job.owner.created_by.clone(),
                    })
                    .await?;
                info!(job_id = %job.id, task_id = %task_id, "registered synchronization reset");
            }
        }
        Ok(self.default_configuration(job))
    }

    fn should_run(&self, _job: &Job, config: &IAppConfig) -> bool {
        Self::settings(config).is_some_and(|s| !s.folders.is_empty() && !s.devices.is_empty())
    }

    fn mutate_pod(
        &self,
        job: &Job,
        config: &IAppConfig,
        _rank: u32,
        pod: &mut Pod,
    ) -> Result<(), CompilationError> {
        let settings = Self::settings(config).ok_or_else(|| CompilationError::Extension {
            app: APP_NAME.to_string(),
            job: job.id.clone(),
            message: "stored configuration is not for syncthing".to_string(),
        })?;

        let mut mounts = Vec::with_capacity(settings.folders.len());
        for (i, folder) in settings.folders.iter().enumerate() {
            let internal = self
                .resolver
                .virtual_to_internal(&folder.ucloud_path)
                .ok_or_else(|| CompilationError::UnknownMount {
                    job: job.id.clone(),
                    path: folder.ucloud_path.clone(),
                })?;
            mounts.push(VolumeMount {
                name: FILESYSTEM_VOLUME.to_string(),
                mount_path: format!("{SYNC_ROOT}/{i}"),
                sub_path: Some(sub_path_of(&internal)),
                ..Default::default()
            });
        }

        let settings_json =
            serde_json::to_string(settings).map_err(|e| CompilationError::Extension {
                app: APP_NAME.to_string(),
                job: job.id.clone(),
                message: e.to_string(),
            })?;

        let port = self
            .ports
            .allocate()
            .ok_or_else(|| CompilationError::PortsExhausted {
                feature: APP_NAME.to_string(),
            })?;
        pod.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(SYNCTHING_PORT_ANNOTATION.to_string(), port.to_string());

        let Some(container) = pod.spec.as_mut().and_then(|s| s.containers.first_mut()) else {
            self.ports.release(port);
            return Err(CompilationError::Extension {
                app: APP_NAME.to_string(),
                job: job.id.clone(),
                message: "pod has no container".to_string(),
            });
        };
        container.image = Some(self.image.clone());
        container.command = None;
        container.working_dir = None;
        container.ports = Some(vec![
            ContainerPort {
                name: Some("sync-tcp".to_string()),
                container_port: i32::from(port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("sync-udp".to_string()),
                container_port: i32::from(port),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
        ]);
        let env = container.env.get_or_insert_with(Vec::new);
        for (name, value) in [
            ("UCLOUD_SYNCTHING_CONFIG", settings_json),
            ("UCLOUD_SYNCTHING_PORT", port.to_string()),
            (
                "UCLOUD_SYNCTHING_RELAYS",
                self.feature.relays_enabled.to_string(),
            ),
        ] {
            env.push(EnvVar {
                name: name.to_string(),
                value: Some(value),
                ..Default::default()
            });
        }
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(mounts);

        debug!(job_id = %job.id, port, folders = settings.folders.len(), "prepared sync daemon");
        Ok(())
    }

    fn extra_services(&self, job: &Job, _config: &IAppConfig, pod: &Pod) -> Vec<Service> {
        let Some(port) = Self::port_of(pod) else {
            return Vec::new();
        };
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        vec![sync_service(
            &job.id,
            namespace,
            &self.feature.ports.ip_address,
            port,
        )]
    }

    fn release(&self, pod: &Pod) {
        if let Some(port) = Self::port_of(pod) {
            debug!(port, "returning unused sync daemon port");
            self.ports.release(port);
        }
    }

    fn mutate_network_policy(
        &self,
        _job: &Job,
        _config: &IAppConfig,
        policy: &mut NetworkPolicy,
        pod: &Pod,
    ) {
        let Some(port) = Self::port_of(pod) else {
            return;
        };
        let range = PortRange {
            start: port,
            end: port,
        };
        let rule = world_rule(&[
            WorldPort {
                protocol: Protocol::Tcp,
                range,
            },
            WorldPort {
                protocol: Protocol::Udp,
                range,
            },
        ]);
        if let (Some(spec), Some(rule)) = (policy.spec.as_mut(), rule) {
            spec.ingress.get_or_insert_with(Vec::new).push(rule);
        }
    }

    fn before_monitor_pass(&self, pods: &[Pod]) {
        if !self.primed.swap(true, Ordering::SeqCst) {
            self.ports.rebuild(pods);
        }
    }
}

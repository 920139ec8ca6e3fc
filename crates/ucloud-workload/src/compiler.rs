//! JobCompiler: a job and a rank in, cluster objects out
//!
//! Compilation performs no I/O. The only state it touches is the SSH port
//! allocator, when one is supplied.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, HostAlias, PersistentVolumeClaimVolumeSource, Pod,
    PodSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info};

use ucloud_common::collaborators::PathResolver;
use ucloud_common::config::ComputeConfig;
use ucloud_common::metrics::record_compilation;
use ucloud_common::model::{
    AppParameterValue, Application, ApplicationType, Job, PortRange, Product, SshMode,
};
use ucloud_common::naming::{service_name, workload_name};
use ucloud_common::ports::PortAllocator;
use ucloud_common::{
    IAPP_ETAG_ANNOTATION, IAPP_NAME_ANNOTATION, JOB_ID_LABEL, RANK_LABEL, SSH_PORT_ANNOTATION,
    WORKSPACE_LABEL,
};

use crate::compiled::CompiledJob;
use crate::error::CompilationError;
use crate::extension::WorkloadExtension;
use crate::invocation::{application_env, identity_env, start_script, JOB_PARAMETERS_ENV};
use crate::mounts::{resolve_mounts, sub_path_of, MountRequest, FILESYSTEM_VOLUME, WORK_DIR};
use crate::multinode::{coordinator_container, etc_mount, etc_volume, inject_ssh_keys};
use crate::policy::{peer_back_patch, FirewallBuilder, Protocol, WorldPort};
use crate::resources::Allocation;
use crate::services::{headless_service, ip_service, ssh_service, SSH_CONTAINER_PORT};

/// Name of the user container
pub const USER_CONTAINER: &str = "user-job";

/// Shared memory volume
pub const SHM_VOLUME: &str = "ucloud-shm";

/// What the compiler needs to know about a declared peer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Project the peer belongs to
    pub project: Option<String>,
    /// Whether the peer already runs, making its policy sealed
    pub running: bool,
    /// Pod address of the peer's rank 0, when known
    pub address: Option<String>,
}

/// A public IP bound to the job
#[derive(Clone, Debug)]
struct PublicIp {
    address: String,
    ports: Vec<PortRange>,
}

/// Compiles one rank of a job into cluster objects
///
/// ```rust,ignore
/// let compiled = JobCompiler::new(&job, 0, &config, &resolver)
///     .with_job_folder("/12/Jobs/app/42")
///     .with_ssh_ports(&ssh_ports)
///     .with_peers(peers)
///     .compile()?;
/// ```
pub struct JobCompiler<'a> {
    job: &'a Job,
    rank: u32,
    config: &'a ComputeConfig,
    resolver: &'a dyn PathResolver,
    job_folder: Option<&'a str>,
    extension: Option<&'a dyn WorkloadExtension>,
    ssh_ports: Option<&'a PortAllocator>,
    peers: BTreeMap<String, PeerInfo>,
}

impl<'a> JobCompiler<'a> {
    /// Create a compiler for `rank` of `job`
    pub fn new(
        job: &'a Job,
        rank: u32,
        config: &'a ComputeConfig,
        resolver: &'a dyn PathResolver,
    ) -> Self {
        Self {
            job,
            rank,
            config,
            resolver,
            job_folder: None,
            extension: None,
            ssh_ports: None,
            peers: BTreeMap::new(),
        }
    }

    /// Virtual path of the job folder, mounted at `/work`
    pub fn with_job_folder(mut self, path: &'a str) -> Self {
        self.job_folder = Some(path);
        self
    }

    /// Integrated application hooks
    pub fn with_extension(mut self, extension: &'a dyn WorkloadExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Allocator for SSH ports
    pub fn with_ssh_ports(mut self, ports: &'a PortAllocator) -> Self {
        self.ssh_ports = Some(ports);
        self
    }

    /// What is known about each declared peer, keyed by job id
    pub fn with_peers(mut self, peers: BTreeMap<String, PeerInfo>) -> Self {
        self.peers = peers;
        self
    }

    /// Compile the rank
    pub fn compile(self) -> Result<CompiledJob, CompilationError> {
        let result = self.compile_inner();
        record_compilation(result.is_ok());
        match &result {
            Ok(compiled) => debug!(
                job_id = %compiled.job_id,
                rank = compiled.rank,
                objects = compiled.object_count(),
                "compiled job"
            ),
            Err(e) => info!(job_id = %self.job.id, rank = self.rank, error = %e, "compilation failed"),
        }
        result
    }

    fn compile_inner(&self) -> Result<CompiledJob, CompilationError> {
        let job = self.job;
        let replicas = job.specification.replicas.max(1);
        if self.rank >= replicas {
            return Err(CompilationError::RankOutOfRange {
                job: job.id.clone(),
                rank: self.rank,
                replicas,
            });
        }

        let app = job
            .application()
            .ok_or_else(|| CompilationError::MissingApplication { job: job.id.clone() })?;
        let product = job
            .status
            .resolved_product
            .as_ref()
            .ok_or_else(|| CompilationError::MissingProduct { job: job.id.clone() })?;

        self.check_sensitive_project()?;
        let public_ip = self.public_ip(replicas)?;

        let ssh_pool = if self.rank == 0 {
            self.ssh_pool(app)?
        } else {
            None
        };

        let mut pod = self.build_pod(app, product, replicas)?;

        if let Some(ext) = self.extension {
            let annotations = pod.metadata.annotations.get_or_insert_with(BTreeMap::new);
            annotations.insert(IAPP_NAME_ANNOTATION.to_string(), ext.name().to_string());
            if let Some(etag) = ext.etag() {
                annotations.insert(IAPP_ETAG_ANNOTATION.to_string(), etag.to_string());
            }
            ext.mutate_pod(job, self.rank, &mut pod)?;
        }

        // Last fallible step, so a port is never held by a pod that was not compiled
        let ssh_port = match ssh_pool.map(PortAllocator::allocate) {
            None => None,
            Some(Some(port)) => Some(port),
            Some(None) => {
                if let Some(ext) = self.extension {
                    ext.release(&pod);
                }
                return Err(CompilationError::PortsExhausted {
                    feature: "ssh".to_string(),
                });
            }
        };
        if let Some(port) = ssh_port {
            pod.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(SSH_PORT_ANNOTATION.to_string(), port.to_string());
            inject_ssh_keys(&mut pod, &job.status.ssh_keys);
        }

        let mut compiled = CompiledJob {
            job_id: job.id.clone(),
            rank: self.rank,
            pod,
            firewall: None,
            service: None,
            ssh_service: None,
            ip_service: None,
            peer_patches: vec![],
            ssh_port,
        };

        if self.rank == 0 {
            self.add_job_objects(&mut compiled, app, public_ip.as_ref());
        }

        Ok(compiled)
    }

    fn check_sensitive_project(&self) -> Result<(), CompilationError> {
        let job = self.job;
        if !job.owner.sensitive_project {
            return Ok(());
        }

        for value in job.all_values() {
            match value {
                AppParameterValue::Ingress { .. } => {
                    return Err(CompilationError::rejected(
                        &job.id,
                        "public links are not allowed in sensitive projects",
                    ))
                }
                AppParameterValue::Network { .. } => {
                    return Err(CompilationError::rejected(
                        &job.id,
                        "public IPs are not allowed in sensitive projects",
                    ))
                }
                _ => {}
            }
        }

        for peer in job.peer_job_ids() {
            let same_project = self
                .peers
                .get(peer)
                .is_some_and(|p| p.project.is_some() && p.project == job.owner.project);
            if !same_project {
                return Err(CompilationError::rejected(
                    &job.id,
                    format!("job {peer} cannot be connected to a sensitive project"),
                ));
            }
        }
        Ok(())
    }

    fn public_ip(&self, replicas: u32) -> Result<Option<PublicIp>, CompilationError> {
        let job = self.job;
        let mut ips = job.all_values().filter_map(|v| match v {
            AppParameterValue::Network {
                ip_address,
                open_ports,
                ..
            } => Some((ip_address, open_ports)),
            _ => None,
        });

        let Some((address, ports)) = ips.next() else {
            return Ok(None);
        };
        if !self.config.public_ips.enabled {
            return Err(CompilationError::rejected(
                &job.id,
                "public IPs are not supported by this provider",
            ));
        }
        if replicas > 1 || ips.next().is_some() {
            return Err(CompilationError::rejected(
                &job.id,
                "public IPs can only be used by a single replica with a single address",
            ));
        }
        let address = address.clone().ok_or_else(|| {
            CompilationError::rejected(&job.id, "public IP has not been assigned an address")
        })?;

        Ok(Some(PublicIp {
            address,
            ports: ports.clone(),
        }))
    }

    /// The pool an SSH port is drawn from, if the job gets one
    fn ssh_pool(&self, app: &Application) -> Result<Option<&'a PortAllocator>, CompilationError> {
        let job = self.job;
        let requested = match app.invocation.ssh {
            SshMode::Disabled => false,
            SshMode::Optional => job.specification.ssh_enabled,
            SshMode::Mandatory => true,
        };
        if !requested {
            return Ok(None);
        }

        let enabled = self.config.ssh.as_ref().is_some_and(|s| s.enabled);
        match (enabled, self.ssh_ports) {
            (true, Some(ports)) => Ok(Some(ports)),
            _ if app.invocation.ssh == SshMode::Mandatory => Err(CompilationError::rejected(
                &job.id,
                "the application requires SSH which this provider does not offer",
            )),
            _ => {
                debug!(job_id = %job.id, "SSH requested but not available, skipping");
                Ok(None)
            }
        }
    }

    fn build_pod(
        &self,
        app: &Application,
        product: &Product,
        replicas: u32,
    ) -> Result<Pod, CompilationError> {
        let job = self.job;
        let rank = self.rank;
        let namespace = self.config.namespace.as_str();
        let tool = &app.invocation.tool;
        let machine = self.config.machine(product);
        let allocation = Allocation::for_product(product, &machine);

        let requests: Vec<MountRequest> = job
            .all_values()
            .filter_map(|v| match v {
                AppParameterValue::File { path, read_only } => Some(MountRequest {
                    path: path.clone(),
                    read_only: *read_only,
                }),
                _ => None,
            })
            .collect();
        let mounts = resolve_mounts(&job.id, &requests, self.resolver)?;

        let mut volume_mounts: Vec<VolumeMount> = Vec::new();
        if let Some(folder) = self.job_folder {
            let internal = self.resolver.virtual_to_internal(folder).ok_or_else(|| {
                CompilationError::UnknownMount {
                    job: job.id.clone(),
                    path: folder.to_string(),
                }
            })?;
            volume_mounts.push(VolumeMount {
                name: FILESYSTEM_VOLUME.to_string(),
                mount_path: WORK_DIR.to_string(),
                sub_path: Some(sub_path_of(&internal)),
                ..Default::default()
            });
        }
        volume_mounts.extend(mounts.iter().map(|m| m.volume_mount()));
        volume_mounts.push(etc_mount());
        volume_mounts.push(VolumeMount {
            name: SHM_VOLUME.to_string(),
            mount_path: "/dev/shm".to_string(),
            ..Default::default()
        });

        let mut env = identity_env(&job.id, rank, replicas);
        env.extend(application_env(&app.invocation, job, &mounts));

        // Only rank 0 writes the parameters document, and only into a mounted job folder
        let parameters = match (&job.status.job_parameters, self.job_folder) {
            (Some(document), Some(_)) if rank == 0 => Some(document.to_string()),
            _ => None,
        };
        if let Some(document) = &parameters {
            env.push(EnvVar {
                name: JOB_PARAMETERS_ENV.to_string(),
                value: Some(document.clone()),
                ..Default::default()
            });
        }

        let run_as_root = tool.container.run_as_root;
        let container = Container {
            name: USER_CONTAINER.to_string(),
            image: Some(tool.image.clone()),
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                start_script(&app.invocation, job, rank, &mounts, parameters.is_some()),
            ]),
            env: Some(env),
            resources: Some(allocation.requirements()),
            volume_mounts: Some(volume_mounts),
            working_dir: tool
                .container
                .change_working_directory
                .then(|| WORK_DIR.to_string()),
            security_context: Some(SecurityContext {
                run_as_non_root: Some(!run_as_root),
                allow_privilege_escalation: Some(run_as_root),
                ..Default::default()
            }),
            ..Default::default()
        };

        let volumes = vec![
            Volume {
                name: FILESYSTEM_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: self.config.file_system.claim_name.clone(),
                    read_only: None,
                }),
                ..Default::default()
            },
            etc_volume(),
            Volume {
                name: SHM_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    medium: Some("Memory".to_string()),
                    size_limit: Some(allocation.memory_quantity()),
                }),
                ..Default::default()
            },
        ];

        let host_aliases: Vec<HostAlias> = job
            .all_values()
            .filter_map(|v| match v {
                AppParameterValue::Peer { hostname, job_id } => {
                    let address = self.peers.get(job_id)?.address.clone()?;
                    Some(HostAlias {
                        hostnames: Some(vec![hostname.clone()]),
                        ip: address,
                    })
                }
                _ => None,
            })
            .collect();

        let name = workload_name(&job.id, rank);
        let mut labels = BTreeMap::from([
            (JOB_ID_LABEL.to_string(), job.id.clone()),
            (RANK_LABEL.to_string(), rank.to_string()),
        ]);
        if let Some(project) = &job.owner.project {
            labels.insert(WORKSPACE_LABEL.to_string(), project.clone());
        }
        let annotations = BTreeMap::from([
            (JOB_ID_LABEL.to_string(), job.id.clone()),
            (RANK_LABEL.to_string(), rank.to_string()),
        ]);

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                hostname: Some(name),
                subdomain: Some(service_name(&job.id)),
                restart_policy: Some("Never".to_string()),
                automount_service_account_token: Some(false),
                runtime_class_name: machine.runtime_class,
                init_containers: Some(vec![coordinator_container(
                    &job.id,
                    replicas,
                    rank,
                    namespace,
                    &self.config.images.coordinator,
                )]),
                containers: vec![container],
                volumes: Some(volumes),
                host_aliases: (!host_aliases.is_empty()).then_some(host_aliases),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn add_job_objects(
        &self,
        compiled: &mut CompiledJob,
        app: &Application,
        public_ip: Option<&PublicIp>,
    ) {
        let job = self.job;
        let namespace = self.config.namespace.as_str();

        let mut world = Vec::new();
        // The SSH service maps the external port onto the daemon's port
        if compiled.ssh_port.is_some() {
            world.push(WorldPort::tcp(SSH_CONTAINER_PORT));
        }
        if let Some(ip) = public_ip {
            for range in &ip.ports {
                for protocol in [Protocol::Tcp, Protocol::Udp] {
                    world.push(WorldPort {
                        protocol,
                        range: *range,
                    });
                }
            }
        }

        let mut firewall = FirewallBuilder::new(&job.id, namespace);
        for peer in job.peer_job_ids() {
            firewall = firewall.allow_peer(peer);
            if self.peers.get(peer).is_some_and(|p| p.running) {
                compiled.peer_patches.push(peer_back_patch(&job.id, peer));
            }
        }
        compiled.firewall = Some(firewall.allow_from_world(&world).build());

        let app_ports: Vec<(&str, u16)> = match app.invocation.application_type {
            ApplicationType::Web => app.invocation.web_port.map(|p| ("web", p)),
            ApplicationType::Vnc => app.invocation.vnc_port.map(|p| ("vnc", p)),
            ApplicationType::Batch => None,
        }
        .into_iter()
        .collect();
        compiled.service = Some(headless_service(&job.id, namespace, &app_ports));

        if let (Some(port), Some(ssh)) = (compiled.ssh_port, self.config.ssh.as_ref()) {
            compiled.ssh_service = Some(ssh_service(&job.id, namespace, &ssh.ip_address, port));
        }
        if let Some(ip) = public_ip {
            compiled.ip_service = Some(ip_service(&job.id, namespace, &ip.address, &ip.ports));
        }
    }
}

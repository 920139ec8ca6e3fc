//! Cluster-side configuration of the compute backend
//!
//! Loaded once at startup from YAML. Validation of the wider provider
//! configuration happens elsewhere; this only carries what the compiler,
//! the integrated applications and the monitor read.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Product;
use crate::Error;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "ucloud-apps";

/// Accelerator resource used when a machine category does not override it
pub const DEFAULT_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Image used by the multi-node init step when none is configured
pub const DEFAULT_COORDINATOR_IMAGE: &str = "alpine:latest";

/// Top-level compute configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeConfig {
    /// Namespace every compiled object lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Assumed image download speed in MB/s, used for progress estimates
    #[serde(default = "default_download_speed")]
    pub estimated_container_download_speed: f64,

    /// Machine categories keyed by category name
    #[serde(default)]
    pub machines: BTreeMap<String, MachineCategory>,

    /// SSH exposure
    #[serde(default)]
    pub ssh: Option<PortRangeFeature>,

    /// Sync-daemon integrated application
    #[serde(default)]
    pub syncthing: Option<SyncthingFeature>,

    /// Interactive terminal integrated application
    #[serde(default)]
    pub integrated_terminal: FeatureToggle,

    /// Public IP binding
    #[serde(default)]
    pub public_ips: FeatureToggle,

    /// Shared filesystem every mount is a sub-path of
    #[serde(default)]
    pub file_system: FileSystem,

    /// Images used for auxiliary containers
    #[serde(default)]
    pub images: AuxiliaryImages,

    /// Seconds between monitor passes
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,

    /// Seconds to wait before a tracker reconnects after its watch ends
    #[serde(default = "default_tracker_backoff")]
    pub tracker_backoff_seconds: u64,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_download_speed() -> f64 {
    14.5
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_tracker_backoff() -> u64 {
    5
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            estimated_container_download_speed: default_download_speed(),
            machines: BTreeMap::new(),
            ssh: None,
            syncthing: None,
            integrated_terminal: FeatureToggle::default(),
            public_ips: FeatureToggle::default(),
            file_system: FileSystem::default(),
            images: AuxiliaryImages::default(),
            monitor_interval_seconds: default_monitor_interval(),
            tracker_backoff_seconds: default_tracker_backoff(),
        }
    }
}

impl ComputeConfig {
    /// Parse a configuration document
    pub fn from_yaml(raw: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Interval between monitor passes
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds.max(1))
    }

    /// Reconnect delay for resource trackers
    pub fn tracker_backoff(&self) -> Duration {
        Duration::from_secs(self.tracker_backoff_seconds)
    }

    /// Look up the cluster-side settings for a product
    ///
    /// The category entry decides the accelerator resource and runtime class.
    /// A configuration with the same advertised shape may override the CPU
    /// given to the container.
    pub fn machine(&self, product: &Product) -> MachineSettings {
        let Some(cat) = self.machines.get(&product.category) else {
            return MachineSettings::default();
        };

        let cpu_millis = cat
            .groups
            .values()
            .flat_map(|g| g.configs.iter())
            .find(|c| {
                c.advertised_cpu == product.cpu
                    && c.memory_in_gigabytes == product.memory_in_gigs
                    && c.gpu == product.gpu
            })
            .and_then(|c| c.actual_cpu_millis);

        MachineSettings {
            actual_cpu_millis: cpu_millis,
            gpu_resource_type: cat
                .gpu_resource_type
                .clone()
                .unwrap_or_else(|| DEFAULT_GPU_RESOURCE.to_string()),
            runtime_class: cat.custom_runtime.clone(),
        }
    }
}

/// A category of machines with shared hardware traits
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineCategory {
    /// Groups of concrete machine configurations
    #[serde(default)]
    pub groups: BTreeMap<String, MachineGroup>,
    /// Extended resource used to request accelerators
    #[serde(default)]
    pub gpu_resource_type: Option<String>,
    /// Runtime class for pods of this category
    #[serde(default)]
    pub custom_runtime: Option<String>,
}

/// A group of machine configurations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineGroup {
    /// Concrete configurations
    #[serde(default)]
    pub configs: Vec<MachineConfiguration>,
}

/// One concrete machine offering
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfiguration {
    /// vCPUs advertised to users
    pub advertised_cpu: u32,
    /// CPU actually given to the container, if different
    #[serde(default)]
    pub actual_cpu_millis: Option<u32>,
    /// Memory in gigabytes
    pub memory_in_gigabytes: u32,
    /// Accelerators
    #[serde(default)]
    pub gpu: u32,
}

/// Resolved settings for one machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineSettings {
    /// CPU override in millicores
    pub actual_cpu_millis: Option<u32>,
    /// Extended resource name for accelerators
    pub gpu_resource_type: String,
    /// Runtime class name, if any
    pub runtime_class: Option<String>,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            actual_cpu_millis: None,
            gpu_resource_type: DEFAULT_GPU_RESOURCE.to_string(),
            runtime_class: None,
        }
    }
}

/// An on/off switch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggle {
    /// Whether the feature is on
    #[serde(default)]
    pub enabled: bool,
}

/// A feature exposing ports from a range on a fixed address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRangeFeature {
    /// Whether the feature is on
    #[serde(default)]
    pub enabled: bool,
    /// Address the ports are reachable on
    pub ip_address: String,
    /// Hostname shown to users, if different from the address
    #[serde(default)]
    pub hostname: Option<String>,
    /// First port in the range
    pub port_min: u16,
    /// Last port in the range
    pub port_max: u16,
}

/// Sync-daemon settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncthingFeature {
    /// Address and port range the daemon is reachable on
    #[serde(flatten)]
    pub ports: PortRangeFeature,
    /// Allow relay servers
    #[serde(default)]
    pub relays_enabled: bool,
}

/// The shared filesystem volume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystem {
    /// Persistent volume claim holding every drive
    #[serde(default = "default_claim_name")]
    pub claim_name: String,
}

fn default_claim_name() -> String {
    "cephfs".to_string()
}

impl Default for FileSystem {
    fn default() -> Self {
        Self {
            claim_name: default_claim_name(),
        }
    }
}

/// Images for containers the backend adds on its own
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryImages {
    /// Multi-node init step
    #[serde(default = "default_coordinator_image")]
    pub coordinator: String,
    /// Sync daemon
    #[serde(default = "default_syncthing_image")]
    pub syncthing: String,
    /// Interactive terminal
    #[serde(default = "default_terminal_image")]
    pub terminal: String,
}

fn default_coordinator_image() -> String {
    DEFAULT_COORDINATOR_IMAGE.to_string()
}

fn default_syncthing_image() -> String {
    "dreg.cloud.sdu.dk/ucloud/syncthing-go:1.4.2".to_string()
}

fn default_terminal_image() -> String {
    "dreg.cloud.sdu.dk/ucloud-apps/terminal-ubuntu:0.8.6".to_string()
}

impl Default for AuxiliaryImages {
    fn default() -> Self {
        Self {
            coordinator: default_coordinator_image(),
            syncthing: default_syncthing_image(),
            terminal: default_terminal_image(),
        }
    }
}

//! Common types for the UCloud compute backend: job model, naming protocol,
//! configuration, errors, and the shared allocator/tracker plumbing

#![deny(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod model;
pub mod naming;
pub mod ports;
pub mod telemetry;
pub mod tracker;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every patch issued by the compute backend
pub const FIELD_MANAGER: &str = "ucloud-compute";

/// Label carrying the owning job id on every compiled object
pub const JOB_ID_LABEL: &str = "ucloud.dk/jobId";

/// Label carrying the replica rank on primary workloads
pub const RANK_LABEL: &str = "ucloud.dk/rank";

/// Label carrying the project (workspace) id when the job belongs to one
pub const WORKSPACE_LABEL: &str = "ucloud.dk/workspaceId";

/// Annotation naming the integrated application a sidecar workload runs
pub const IAPP_NAME_ANNOTATION: &str = "ucloud.dk/iappName";

/// Annotation carrying the configuration etag a sidecar workload was compiled with
pub const IAPP_ETAG_ANNOTATION: &str = "ucloud.dk/iappEtag";

/// Annotation recording the externally reachable SSH port of a job
pub const SSH_PORT_ANNOTATION: &str = "ucloud.dk/sshPort";

/// Annotation recording the externally reachable sync-daemon port of a job
pub const SYNCTHING_PORT_ANNOTATION: &str = "ucloud.dk/syncthingPort";

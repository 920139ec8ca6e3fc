//! Job-to-workload compilation for the UCloud compute backend
//!
//! Turns one rank of a [`Job`](ucloud_common::model::Job) into a pod plus,
//! for rank 0, the job's headless service, network policy and optional SSH
//! and public IP services. Compilation is pure; [`submit`] creates the
//! result in the cluster.
//!
//! # Usage
//!
//! ```rust,ignore
//! let compiled = JobCompiler::new(&job, rank, &config, &resolver)
//!     .with_job_folder(&folder)
//!     .with_ssh_ports(&ssh_ports)
//!     .compile()?;
//! let submission = submit(&client, &job, compiled, None, Some(&ssh_ports)).await;
//! ```

mod compiled;
mod compiler;
pub mod error;
mod extension;
pub mod invocation;
pub mod mounts;
pub mod multinode;
pub mod policy;
pub mod resources;
pub mod services;
mod submit;

pub use compiled::CompiledJob;
pub use compiler::{JobCompiler, PeerInfo, SHM_VOLUME, USER_CONTAINER};
pub use error::CompilationError;
pub use extension::WorkloadExtension;
pub use policy::PeerPatch;
pub use submit::{submit, Submission, WorkloadKubeClient, WorkloadKubeClientImpl};

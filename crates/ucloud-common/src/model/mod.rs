//! Job data model shared by the compiler, the integrated applications and the monitor
//!
//! A [`Job`] is owned by the orchestration service. The compute backend only
//! reads its specification and pushes [`JobUpdate`]s back; it never persists jobs.

mod application;
mod job;
mod parameters;
mod update;

pub use application::{
    Application, ApplicationInvocation, ApplicationType, ContainerDescription, InvocationParameter,
    NameAndVersion, SshMode, Tool,
};
pub use job::{
    Job, JobOwner, JobSpecification, JobState, JobStatus, Product, ProductReference,
    SimpleDuration, DEFAULT_TIME_ALLOCATION_HOURS,
};
pub use parameters::{AppParameterValue, PortRange};
pub use update::{running_time, JobUpdate};

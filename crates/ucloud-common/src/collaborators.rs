//! Interfaces to the systems the compute backend consumes but does not own
//!
//! - [`PathResolver`]: virtual filesystem paths to bind-mount targets
//! - [`TaskEngine`]: long-running file work with its own worker pool
//! - [`JobControl`]: the orchestration service's view of active jobs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Job, JobUpdate};
use crate::Error;

/// Translates between virtual paths and paths on the shared filesystem
///
/// Lookups are pure; a `None` means the path or drive is unknown.
pub trait PathResolver: Send + Sync {
    /// `/<driveId>/<rest>` to an absolute path on the storage backend
    fn virtual_to_internal(&self, path: &str) -> Option<String>;

    /// An absolute path on the storage backend back to a virtual path within `drive`
    fn internal_to_virtual(&self, drive: &str, path: &str) -> Option<String>;
}

/// A unit of background file work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpecification {
    /// Short title shown to the user
    pub title: String,
    /// Operation the engine should perform (e.g. `delete`)
    pub operation: String,
    /// Virtual paths the operation works on
    pub paths: Vec<String>,
    /// User the work is done on behalf of
    pub owner: String,
}

/// Progress or completion of a background task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Human-readable progress
    pub message: String,
    /// Whether the task is finished
    pub done: bool,
}

/// The task-processing engine
///
/// Registration only enqueues; callers never wait for the work itself.
#[async_trait]
pub trait TaskEngine: Send + Sync {
    /// Enqueue a task and return its id
    async fn register_task(&self, spec: TaskSpecification) -> Result<String, Error>;

    /// Report progress for a task
    async fn post_status(&self, task_id: &str, update: TaskStatus) -> Result<(), Error>;
}

/// The orchestration service as seen by the monitor
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Every job the orchestration service considers active
    async fn active_jobs(&self) -> Result<Vec<Job>, Error>;

    /// Append an update to a job's log
    async fn track_update(&self, job_id: &str, update: JobUpdate) -> Result<(), Error>;

    /// Push a non-persisted status line to anyone following the job's logs
    async fn ephemeral_status(&self, job_id: &str, rank: u32, message: &str);
}

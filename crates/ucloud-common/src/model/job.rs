//! The Job record as seen by the compute backend

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{AppParameterValue, Application, JobUpdate, NameAndVersion};

/// Time allocation used when a job does not request one (365 days)
pub const DEFAULT_TIME_ALLOCATION_HOURS: i64 = 365 * 24;

/// Lifecycle state of a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, waiting for the cluster to schedule it
    #[default]
    InQueue,
    /// At least one replica is running
    Running,
    /// Termination requested by the user
    Canceling,
    /// Ran to completion
    Success,
    /// Could not run or crashed
    Failure,
    /// Ran out of its time allocation
    Expired,
    /// Paused; the workload is gone but the job may be resumed
    Suspended,
}

impl JobState {
    /// Final states never transition again
    pub fn is_final(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure | JobState::Expired)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::InQueue => "IN_QUEUE",
            JobState::Running => "RUNNING",
            JobState::Canceling => "CANCELING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
            JobState::Expired => "EXPIRED",
            JobState::Suspended => "SUSPENDED",
        };
        f.write_str(s)
    }
}

/// A wall-clock duration as requested by the user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleDuration {
    /// Hours
    pub hours: i64,
    /// Minutes
    pub minutes: i64,
    /// Seconds
    pub seconds: i64,
}

impl SimpleDuration {
    /// Convert to a chrono duration
    pub fn to_duration(self) -> Duration {
        Duration::hours(self.hours) + Duration::minutes(self.minutes) + Duration::seconds(self.seconds)
    }
}

/// Reference to the product (machine type) a job runs on
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductReference {
    /// Machine name, e.g. `u1-standard-4`
    pub id: String,
    /// Machine category, e.g. `u1-standard`
    pub category: String,
    /// Provider id
    pub provider: String,
}

/// The resolved machine description
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Machine name
    pub name: String,
    /// Machine category
    pub category: String,
    /// Advertised vCPU count
    pub cpu: u32,
    /// Memory in gigabytes
    pub memory_in_gigs: u32,
    /// Accelerator count
    #[serde(default)]
    pub gpu: u32,
}

/// Owner of a job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOwner {
    /// Username of the submitter
    pub created_by: String,
    /// Project the job is charged to, if any
    #[serde(default)]
    pub project: Option<String>,
    /// Projects holding sensitive data may not expose the job publicly
    #[serde(default)]
    pub sensitive_project: bool,
}

/// What the user asked for
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpecification {
    /// Application reference
    pub application: NameAndVersion,
    /// Machine reference
    pub product: ProductReference,
    /// Optional user-supplied title
    #[serde(default)]
    pub name: Option<String>,
    /// Number of replicas
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Parameter bindings keyed by parameter name
    #[serde(default)]
    pub parameters: BTreeMap<String, AppParameterValue>,
    /// Resources attached outside of the parameter list (folders, peers, IPs, links)
    #[serde(default)]
    pub resources: Vec<AppParameterValue>,
    /// Requested wall-clock allocation
    #[serde(default)]
    pub time_allocation: Option<SimpleDuration>,
    /// User opted in to SSH access
    #[serde(default)]
    pub ssh_enabled: bool,
}

fn default_replicas() -> u32 {
    1
}

/// Mutable status owned by the orchestration service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current state
    #[serde(default)]
    pub state: JobState,
    /// First time the job was observed running
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Resolved application
    #[serde(default)]
    pub resolved_application: Option<Application>,
    /// Resolved machine
    #[serde(default)]
    pub resolved_product: Option<Product>,
    /// Parameters document written to the job folder as `JobParameters.json`
    #[serde(default, rename = "jobParametersJson")]
    pub job_parameters: Option<serde_json::Value>,
    /// Public keys authorized to log in over SSH
    #[serde(default)]
    pub ssh_keys: Vec<String>,
}

/// A job as seen by the compute backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Identity
    pub id: String,
    /// Owner
    pub owner: JobOwner,
    /// Specification
    pub specification: JobSpecification,
    /// Status
    #[serde(default)]
    pub status: JobStatus,
    /// Append-only update log
    #[serde(default)]
    pub updates: Vec<JobUpdate>,
}

impl Job {
    /// The time allocation, falling back to the default when none was requested
    pub fn time_allocation(&self) -> Duration {
        self.specification
            .time_allocation
            .map(SimpleDuration::to_duration)
            .unwrap_or_else(|| Duration::hours(DEFAULT_TIME_ALLOCATION_HOURS))
    }

    /// When the job first started running, from the status or the update log
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.status.started_at.or_else(|| {
            self.updates
                .iter()
                .filter(|u| u.state == Some(JobState::Running))
                .map(|u| u.timestamp)
                .min()
        })
    }

    /// A job has expired when its allocation has elapsed since it started
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.started_at() {
            Some(started) => now > started + self.time_allocation(),
            None => false,
        }
    }

    /// Append an update, mirroring any state change into the status
    pub fn apply_update(&mut self, update: JobUpdate) {
        if let Some(state) = update.state {
            if state == JobState::Running && self.status.started_at.is_none() {
                self.status.started_at = Some(update.timestamp);
            }
            self.status.state = state;
        }
        self.updates.push(update);
    }

    /// The resolved application, if the orchestration service attached one
    pub fn application(&self) -> Option<&Application> {
        self.status.resolved_application.as_ref()
    }

    /// Every peer job id declared through parameters or resources
    pub fn peer_job_ids(&self) -> Vec<&str> {
        self.all_values().filter_map(AppParameterValue::peer_job).collect()
    }

    /// Parameters followed by resources
    pub fn all_values(&self) -> impl Iterator<Item = &AppParameterValue> {
        self.specification
            .parameters
            .values()
            .chain(self.specification.resources.iter())
    }
}

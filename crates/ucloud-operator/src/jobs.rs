//! Job source backed by a directory of job documents
//!
//! Each `*.yaml`, `*.yml` or `*.json` file holds one job. Updates are kept
//! in memory and logged; status lines without a transition are only logged.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use ucloud_common::collaborators::JobControl;
use ucloud_common::model::{Job, JobUpdate};
use ucloud_common::Error;

/// Jobs loaded from local files
#[derive(Debug, Default)]
pub struct LocalJobs {
    jobs: RwLock<BTreeMap<String, Job>>,
}

impl LocalJobs {
    /// Load every job document in `dir`
    pub fn load_dir(dir: &Path) -> Result<Self, Error> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::configuration(format!("cannot read job directory {}: {e}", dir.display()))
        })?;

        let mut jobs = BTreeMap::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::configuration(format!("cannot list {}: {e}", dir.display())))?
                .path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !matches!(ext, "yaml" | "yml" | "json") {
                continue;
            }
            let job = load_job(&path)?;
            info!(job_id = %job.id, path = %path.display(), "loaded job");
            jobs.insert(job.id.clone(), job);
        }
        Ok(Self::from_jobs(jobs.into_values()))
    }

    /// Wrap already-parsed jobs
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.id.clone(), j)).collect()),
        }
    }

    /// A copy of one job
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }
}

/// Parse one job document, YAML or JSON by extension
pub fn load_job(path: &Path) -> Result<Job, Error> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::configuration(format!("cannot read {}: {e}", path.display())))?;
    let parsed = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| Error::serialization(format!("{}: {e}", path.display())))
}

#[async_trait]
impl JobControl for LocalJobs {
    async fn active_jobs(&self) -> Result<Vec<Job>, Error> {
        Ok(self.jobs.read().values().cloned().collect())
    }

    async fn track_update(&self, job_id: &str, update: JobUpdate) -> Result<(), Error> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            warn!(job_id, "update for unknown job");
            return Err(Error::resolution_for(job_id, "job is not known"));
        };
        info!(
            job_id,
            state = ?update.state,
            status = update.status.as_deref().unwrap_or(""),
            "job update"
        );
        job.apply_update(update);
        Ok(())
    }

    async fn ephemeral_status(&self, job_id: &str, rank: u32, message: &str) {
        info!(job_id, rank, message, "job progress");
    }
}

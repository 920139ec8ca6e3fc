//! Compilation error types

/// Reasons a job cannot be compiled for a rank
///
/// Every variant except [`CompilationError::PortsExhausted`] is a
/// configuration error: retrying without changing the job cannot succeed.
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("job {job} has no resolved application")]
    MissingApplication { job: String },

    #[error("job {job} has no resolved product")]
    MissingProduct { job: String },

    #[error("rank {rank} is out of range for job {job} with {replicas} replicas")]
    RankOutOfRange { job: String, rank: u32, replicas: u32 },

    #[error("unknown drive in path '{path}' for job {job}")]
    UnknownDrive { job: String, path: String },

    #[error("unknown mount '{path}' for job {job}")]
    UnknownMount { job: String, path: String },

    #[error("job {job} rejected: {reason}")]
    Rejected { job: String, reason: String },

    #[error("no free {feature} port available")]
    PortsExhausted { feature: String },

    #[error("integrated application {app} failed to prepare job {job}: {message}")]
    Extension {
        app: String,
        job: String,
        message: String,
    },
}

impl CompilationError {
    /// Create a rejection for a job
    pub fn rejected(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is caused by the job or configuration
    pub fn is_configuration(&self) -> bool {
        !matches!(self, CompilationError::PortsExhausted { .. })
    }
}

impl From<CompilationError> for ucloud_common::Error {
    fn from(e: CompilationError) -> Self {
        let job = match &e {
            CompilationError::MissingApplication { job }
            | CompilationError::MissingProduct { job }
            | CompilationError::RankOutOfRange { job, .. }
            | CompilationError::Rejected { job, .. }
            | CompilationError::Extension { job, .. } => job.clone(),
            CompilationError::UnknownDrive { job, .. }
            | CompilationError::UnknownMount { job, .. } => {
                return ucloud_common::Error::resolution_for(job.clone(), e.to_string())
            }
            CompilationError::PortsExhausted { .. } => {
                return ucloud_common::Error::internal_with_context("compiler", e.to_string())
            }
        };
        ucloud_common::Error::configuration_for(job, e.to_string())
    }
}

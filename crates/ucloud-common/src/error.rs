//! Error types for the compute backend
//!
//! Errors are split along the lines the reconciler cares about: configuration
//! errors are rejected at compile time and never retried, cluster errors are
//! re-attempted on the next pass.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for compute operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A job or integrated-application configuration that can never succeed
    #[error("configuration error for job {job}: {message}")]
    Configuration {
        /// Job the configuration belongs to
        job: String,
        /// Description of what's invalid
        message: String,
    },

    /// A virtual path, drive, or product that could not be resolved
    #[error("resolution error for job {job}: {message}")]
    Resolution {
        /// Job being compiled
        job: String,
        /// Description of what could not be resolved
        message: String,
    },

    /// A cluster call exceeded its deadline
    #[error("timed out after {}s during {operation}", .after.as_secs())]
    Timeout {
        /// The operation that timed out (e.g., "create pod")
        operation: String,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "tracker", "monitor")
        context: String,
    },
}

impl Error {
    /// Create a configuration error without job context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            job: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a specific job
    pub fn configuration_for(job: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            job: job.into(),
            message: msg.into(),
        }
    }

    /// Create a resolution error for a specific job
    pub fn resolution_for(job: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Resolution {
            job: job.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Transient errors are re-observed on the next reconcile pass. Everything
    /// else needs a configuration change before it can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || ae.code == 429 || ae.code >= 500,
                _ => true,
            },
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
            Error::Configuration { .. } => false,
            Error::Resolution { .. } => false,
            Error::Serialization { .. } => false,
        }
    }

    /// Check if this error is a 404 from the cluster API
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Get the job id if this error is associated with a specific job
    pub fn job(&self) -> Option<&str> {
        match self {
            Error::Configuration { job, .. } | Error::Resolution { job, .. } => {
                (job != UNKNOWN_CONTEXT).then_some(job.as_str())
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

//! Integrated application errors

use ucloud_workload::CompilationError;

/// Failures of the integrated application framework
#[derive(Debug, thiserror::Error)]
pub enum IAppError {
    /// The configuration can never be accepted as is
    #[error("invalid {app} configuration for job {job}: {message}")]
    InvalidConfiguration {
        /// Application name
        app: String,
        /// Job the configuration belongs to
        job: String,
        /// What is wrong
        message: String,
    },

    /// No handler is registered under the name
    #[error("unknown integrated application '{name}'")]
    UnknownApplication {
        /// Requested name
        name: String,
    },

    /// The provider has the application switched off
    #[error("integrated application {app} is not enabled on this provider")]
    Disabled {
        /// Application name
        app: String,
    },

    /// Storage or cluster failure
    #[error(transparent)]
    Common(#[from] ucloud_common::Error),

    /// The workload could not be prepared
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

impl IAppError {
    /// Create an invalid-configuration error
    pub fn invalid(
        app: impl Into<String>,
        job: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            app: app.into(),
            job: job.into(),
            message: message.into(),
        }
    }

    /// Whether retrying later can succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IAppError::Common(e) => e.is_transient(),
            IAppError::Compilation(e) => !e.is_configuration(),
            _ => false,
        }
    }
}

impl From<IAppError> for ucloud_common::Error {
    fn from(e: IAppError) -> Self {
        let job = match &e {
            IAppError::InvalidConfiguration { job, .. } => Some(job.clone()),
            _ => None,
        };
        match (e, job) {
            (IAppError::Common(inner), _) => inner,
            (IAppError::Compilation(inner), _) => inner.into(),
            (other, Some(job)) => ucloud_common::Error::configuration_for(job, other.to_string()),
            (other, None) => ucloud_common::Error::configuration(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!IAppError::invalid("syncthing", "1", "bad").is_transient());
        assert!(IAppError::Compilation(CompilationError::PortsExhausted {
            feature: "syncthing".to_string()
        })
        .is_transient());
        assert!(IAppError::Common(ucloud_common::Error::internal("boom")).is_transient());
    }

    #[test]
    fn test_invalid_configuration_keeps_job() {
        let e: ucloud_common::Error = IAppError::invalid("terminal", "9", "no folder").into();
        assert_eq!(e.job(), Some("9"));
    }
}

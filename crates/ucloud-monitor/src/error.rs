//! Monitor error types

use ucloud_iapp::IAppError;

/// Failures of a monitor pass
///
/// Only failures to observe cluster or job state abort a pass. Failures
/// acting on a single job are logged and retried on the next pass.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Listing workloads or jobs failed
    #[error("failed to observe {what}: {source}")]
    Observe {
        /// What was being listed
        what: &'static str,
        /// Underlying failure
        #[source]
        source: ucloud_common::Error,
    },

    /// Cluster or collaborator failure while acting on one job
    #[error(transparent)]
    Common(#[from] ucloud_common::Error),

    /// Integrated application failure
    #[error(transparent)]
    IApp(#[from] IAppError),
}

impl MonitorError {
    /// Create an observation error
    pub fn observe(what: &'static str, source: ucloud_common::Error) -> Self {
        Self::Observe { what, source }
    }
}

//! Per-job integrated application state machine
//!
//! ```text
//! Absent -> Validating -> Running -> Restarting -> Absent
//!                                 \-> Suspended  -> Absent
//! ```
//!
//! The monitor is the only driver. Each pass compares the stored
//! configuration with the live workload and acts on the [`Decision`].

use std::fmt;

use ucloud_common::model::Job;

use crate::config::IAppConfig;
use crate::handler::IntegratedApplication;

/// Lifecycle of one integrated application on one job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IAppState {
    /// No workload and nothing scheduled
    #[default]
    Absent,
    /// A configuration was submitted and is being checked
    Validating,
    /// The workload runs with the current configuration
    Running,
    /// The workload is being replaced because its configuration changed
    Restarting,
    /// The workload was stopped because it should no longer run
    Suspended,
}

impl fmt::Display for IAppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IAppState::Absent => "absent",
            IAppState::Validating => "validating",
            IAppState::Running => "running",
            IAppState::Restarting => "restarting",
            IAppState::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// What the monitor should do for one job this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Live and current: mirror its status into the job
    Keep,
    /// Live but stale or unwanted: delete it and suspend the job
    Stop {
        /// The application still wants to run, with a new configuration
        restart: bool,
    },
    /// Configured and wanted but not live: compile and submit it
    Schedule,
    /// Nothing live and nothing wanted
    Idle,
}

impl Decision {
    /// State after acting on this decision
    pub fn next_state(self) -> IAppState {
        match self {
            Decision::Keep => IAppState::Running,
            Decision::Stop { restart: true } => IAppState::Restarting,
            Decision::Stop { restart: false } => IAppState::Suspended,
            Decision::Schedule => IAppState::Validating,
            Decision::Idle => IAppState::Absent,
        }
    }
}

/// Decide what to do about one job's application
///
/// `live_etag` is `Some` when a workload exists, holding the etag it was
/// compiled with (empty when the annotation is missing).
pub fn evaluate(
    handler: &dyn IntegratedApplication,
    job: &Job,
    stored: Option<&IAppConfig>,
    live_etag: Option<&str>,
) -> Decision {
    let wanted = stored.is_some_and(|c| handler.should_run(job, c));
    match (live_etag, stored) {
        (Some(live), Some(config)) if wanted && live == config.etag => Decision::Keep,
        (Some(_), _) => Decision::Stop { restart: wanted },
        (None, _) if wanted => Decision::Schedule,
        (None, _) => Decision::Idle,
    }
}

//! Job updates and the elapsed-time computation over the update log

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::JobState;

/// One entry in a job's update log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    /// When the update happened
    pub timestamp: DateTime<Utc>,
    /// New state, if the update is a transition
    #[serde(default)]
    pub state: Option<JobState>,
    /// Human-readable status line
    #[serde(default)]
    pub status: Option<String>,
}

impl JobUpdate {
    /// A state transition with a status line
    pub fn state(state: JobState, timestamp: DateTime<Utc>, status: impl Into<String>) -> Self {
        Self {
            timestamp,
            state: Some(state),
            status: Some(status.into()),
        }
    }

    /// A status line without a transition
    pub fn message(timestamp: DateTime<Utc>, status: impl Into<String>) -> Self {
        Self {
            timestamp,
            state: None,
            status: Some(status.into()),
        }
    }
}

/// Total time spent in `Running`, computed from an update log
///
/// Updates are ordered by timestamp before folding, so duplicated or
/// reordered transitions produce the same result as a clean log. A repeated
/// `Running` while already running does not restart the interval.
pub fn running_time(updates: &[JobUpdate], now: DateTime<Utc>) -> Duration {
    let mut transitions: Vec<(DateTime<Utc>, JobState)> = updates
        .iter()
        .filter_map(|u| u.state.map(|s| (u.timestamp, s)))
        .collect();
    transitions.sort_by_key(|(ts, _)| *ts);

    let mut total = Duration::zero();
    let mut running_since: Option<DateTime<Utc>> = None;
    for (ts, state) in transitions {
        match (state, running_since) {
            (JobState::Running, None) => running_since = Some(ts),
            (JobState::Running, Some(_)) => {}
            (_, Some(since)) => {
                total += ts - since;
                running_since = None;
            }
            (_, None) => {}
        }
    }

    if let Some(since) = running_since {
        if now > since {
            total += now - since;
        }
    }
    total
}

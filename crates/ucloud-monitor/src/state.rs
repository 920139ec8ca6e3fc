//! Observed pod phase to job state
//!
//! A job with several replicas is as healthy as its worst replica.

use k8s_openapi::api::core::v1::Pod;

use ucloud_common::model::JobState;

/// The job state a single pod implies, with a status line
pub fn pod_state(pod: &Pod) -> (JobState, String) {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Pending");

    match phase {
        "Pending" => (JobState::InQueue, "Job is waiting to start".to_string()),
        "Running" => (JobState::Running, "Job is now running".to_string()),
        "Succeeded" => (JobState::Success, "Job has terminated".to_string()),
        "Failed" => {
            let detail = match exit_code(pod) {
                Some(code) => format!("Job has failed with exit code {code}"),
                None => "Job has failed".to_string(),
            };
            (JobState::Failure, detail)
        }
        _ => (
            JobState::Failure,
            "Job is in an unknown state, the node may be lost".to_string(),
        ),
    }
}

/// Exit code of the first terminated container
pub fn exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find_map(|c| c.state.as_ref()?.terminated.as_ref().map(|t| t.exit_code))
}

/// Severity used to pick the worst replica, higher is worse
pub fn rank(state: JobState) -> u8 {
    match state {
        JobState::Running => 0,
        JobState::InQueue => 1,
        JobState::Suspended => 2,
        JobState::Success => 3,
        JobState::Expired => 4,
        JobState::Failure => 5,
        JobState::Canceling => 2,
    }
}

/// The worst state among the replicas, with its status line
pub fn gang_state<I>(states: I) -> Option<(JobState, String)>
where
    I: IntoIterator<Item = (JobState, String)>,
{
    states.into_iter().max_by_key(|(s, _)| rank(*s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };

    fn pod(phase: &str, exit: Option<i32>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: exit.map(|code| {
                    vec![ContainerStatus {
                        name: "user-job".to_string(),
                        state: Some(ContainerState {
                            terminated: Some(ContainerStateTerminated {
                                exit_code: code,
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(pod_state(&pod("Pending", None)).0, JobState::InQueue);
        assert_eq!(pod_state(&pod("Running", None)).0, JobState::Running);
        assert_eq!(pod_state(&pod("Succeeded", Some(0))).0, JobState::Success);
        assert_eq!(pod_state(&pod("Unknown", None)).0, JobState::Failure);
        assert_eq!(pod_state(&Pod::default()).0, JobState::InQueue);
    }

    #[test]
    fn test_failed_pods_are_failures_with_exit_code() {
        let (state, message) = pod_state(&pod("Failed", Some(137)));
        assert_eq!(state, JobState::Failure);
        assert!(message.contains("137"));
    }

    #[test]
    fn test_gang_takes_the_worst_replica() {
        let s = |state| (state, String::new());
        assert_eq!(
            gang_state([s(JobState::Running), s(JobState::InQueue)]).unwrap().0,
            JobState::InQueue
        );
        assert_eq!(
            gang_state([s(JobState::Success), s(JobState::Failure), s(JobState::Running)])
                .unwrap()
                .0,
            JobState::Failure
        );
        assert!(gang_state(Vec::new()).is_none());
    }
}

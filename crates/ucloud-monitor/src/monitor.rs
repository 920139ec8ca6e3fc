//! The reconciliation pass
//!
//! Each pass lists the live workloads, groups them by job through the
//! workload naming protocol, and compares them with the active jobs:
//!
//! - workloads without an active job are orphans and are deleted
//! - expired jobs are marked `Expired` and cleaned up, skipping phase mapping
//! - integrated applications are stopped, kept, or scheduled by etag
//! - every other job mirrors the worst state among its replicas
//!
//! Passes never overlap. A failure acting on one job is logged and the next
//! pass tries again.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Pod;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ucloud_common::collaborators::JobControl;
use ucloud_common::metrics::{PassTimer, JOBS_EXPIRED, MONITOR_WORKLOADS, ORPHANS_CLEANED};
use ucloud_common::model::{Job, JobState, JobUpdate};
use ucloud_common::naming::parse_workload_name;
use ucloud_common::ports::PortAllocator;
use ucloud_common::{Error, IAPP_ETAG_ANNOTATION};
use ucloud_iapp::{evaluate, Decision, IAppConfig, IAppConfigStore, IAppRegistry, IAppState};

use crate::client::MonitorKubeClient;
use crate::error::MonitorError;
use crate::progress::ProgressEstimator;
use crate::state::{gang_state, pod_state};
use crate::termination::Terminator;

/// Compiles and submits an integrated application's workload
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IAppLauncher: Send + Sync {
    /// Start the workload for `job` with `config`
    async fn launch(&self, job: &Job, config: &IAppConfig) -> Result<(), Error>;
}

/// What one pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Live workloads that parsed as job replicas
    pub workloads: usize,
    /// State transitions sent to the orchestrator
    pub transitions: usize,
    /// Jobs whose objects were deleted
    pub terminated: usize,
    /// Orphaned jobs among the terminated
    pub orphans: usize,
    /// Jobs that ran out of time this pass
    pub expired: usize,
    /// Integrated applications started
    pub launched: usize,
    /// Failures acting on single jobs
    pub errors: usize,
}

struct IAppSupport {
    registry: IAppRegistry,
    store: Arc<dyn IAppConfigStore>,
    launcher: Arc<dyn IAppLauncher>,
}

/// The reconciliation loop
pub struct Monitor {
    client: Arc<dyn MonitorKubeClient>,
    jobs: Arc<dyn JobControl>,
    terminator: Terminator,
    iapps: Option<IAppSupport>,
    estimator: Option<ProgressEstimator>,
    iapp_states: DashMap<String, IAppState>,
    /// Job id to the etag whose launch failure was already reported
    failed_launches: DashMap<String, String>,
}

impl Monitor {
    /// Create a monitor over `client`, reporting to `jobs`
    pub fn new(client: Arc<dyn MonitorKubeClient>, jobs: Arc<dyn JobControl>) -> Self {
        Self {
            terminator: Terminator::new(client.clone()),
            client,
            jobs,
            iapps: None,
            estimator: None,
            iapp_states: DashMap::new(),
            failed_launches: DashMap::new(),
        }
    }

    /// Release ports of this allocator when jobs terminate
    pub fn with_allocator(mut self, allocator: Arc<PortAllocator>) -> Self {
        self.terminator = self.terminator.with_allocator(allocator);
        self
    }

    /// Drive integrated applications
    pub fn with_iapps(
        mut self,
        registry: IAppRegistry,
        store: Arc<dyn IAppConfigStore>,
        launcher: Arc<dyn IAppLauncher>,
    ) -> Self {
        self.iapps = Some(IAppSupport {
            registry,
            store,
            launcher,
        });
        self
    }

    /// Publish download progress for pending jobs
    pub fn with_estimator(mut self, estimator: ProgressEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Last known integrated application state of a job
    pub fn iapp_state(&self, job_id: &str) -> IAppState {
        self.iapp_states
            .get(job_id)
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Run passes every `interval` until cancelled
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs(), "monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let timer = PassTimer::start();
            match self.run_pass(Utc::now()).await {
                Ok(report) => {
                    if report.errors == 0 {
                        timer.success();
                    } else {
                        timer.error();
                    }
                    debug!(?report, "monitor pass complete");
                }
                Err(e) => {
                    timer.error();
                    warn!(error = %e, "monitor pass failed");
                }
            }
        }
    }

    /// One reconciliation pass at time `now`
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport, MonitorError> {
        let pods = self
            .client
            .list_pods()
            .await
            .map_err(|e| MonitorError::observe("workloads", e))?;
        if let Some(iapps) = &self.iapps {
            iapps.registry.before_monitor_pass(&pods);
        }

        let jobs = self
            .jobs
            .active_jobs()
            .await
            .map_err(|e| MonitorError::observe("jobs", e))?;

        let mut report = PassReport::default();
        let mut groups = group_by_job(&pods);
        report.workloads = groups.values().map(Vec::len).sum();
        MONITOR_WORKLOADS.record(report.workloads as i64, &[]);

        let active: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        for (job_id, group) in &groups {
            if active.contains(job_id.as_str()) {
                continue;
            }
            info!(job_id = %job_id, pods = group.len(), "cleaning up orphaned workload");
            report.orphans += 1;
            ORPHANS_CLEANED.add(1, &[]);
            self.terminate(job_id, group, &mut report).await;
        }

        for job in &jobs {
            let group = groups.remove(&job.id).unwrap_or_default();
            if let Err(e) = self.reconcile_job(job, &group, now, &mut report).await {
                warn!(job_id = %job.id, error = %e, "failed to reconcile job");
                report.errors += 1;
            }
        }

        self.iapp_states
            .retain(|job_id, _| active.contains(job_id.as_str()));
        self.failed_launches
            .retain(|job_id, _| active.contains(job_id.as_str()));

        Ok(report)
    }

    async fn reconcile_job(
        &self,
        job: &Job,
        pods: &[&Pod],
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), MonitorError> {
        let current = job.status.state;

        if !current.is_final() && job.is_expired(now) {
            info!(job_id = %job.id, "job exceeded its time allocation");
            report.expired += 1;
            JOBS_EXPIRED.add(1, &[]);
            self.transition(job, JobState::Expired, "Job has expired", now, report)
                .await?;
            if !pods.is_empty() {
                self.terminate(&job.id, pods, report).await;
            }
            return Ok(());
        }

        if current.is_final() {
            if !pods.is_empty() {
                debug!(job_id = %job.id, state = %current, "removing workload of finished job");
                self.terminate(&job.id, pods, report).await;
            }
            return Ok(());
        }

        if current == JobState::Canceling {
            if pods.is_empty() {
                self.transition(job, JobState::Success, "Job has been cancelled", now, report)
                    .await?;
            } else {
                self.terminate(&job.id, pods, report).await;
            }
            return Ok(());
        }

        if let Some(iapps) = &self.iapps {
            if iapps.registry.for_job(job).is_some() {
                let proceed = self.reconcile_iapp(iapps, job, pods, now, report).await?;
                if !proceed {
                    return Ok(());
                }
            }
        }

        let Some((state, message)) = gang_state(pods.iter().map(|p| pod_state(p))) else {
            return Ok(());
        };
        if state != current {
            self.transition(job, state, &message, now, report).await?;
        }
        if state.is_final() {
            self.terminate(&job.id, pods, report).await;
            return Ok(());
        }

        if state == JobState::InQueue {
            self.publish_progress(job, pods, now).await;
        }
        Ok(())
    }

    /// Drive one job's integrated application; `true` continues with
    /// ordinary state mirroring
    async fn reconcile_iapp(
        &self,
        iapps: &IAppSupport,
        job: &Job,
        pods: &[&Pod],
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<bool, MonitorError> {
        let Some(handler) = iapps.registry.for_job(job) else {
            return Ok(true);
        };
        let stored = iapps.store.get(&job.id).await?;
        let live_etag = pods.first().map(|pod| {
            pod.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(IAPP_ETAG_ANNOTATION))
                .map(String::as_str)
                .unwrap_or("")
        });

        let decision = evaluate(handler.as_ref(), job, stored.as_ref(), live_etag);
        self.record_iapp_state(job, handler.name(), decision.next_state());

        match decision {
            Decision::Keep => Ok(true),
            Decision::Stop { restart } => {
                info!(job_id = %job.id, app = handler.name(), restart, "stopping integrated application");
                self.terminate(&job.id, pods, report).await;
                if job.status.state != JobState::Suspended {
                    let message = if restart {
                        "Restarting with new configuration"
                    } else {
                        "Application is no longer configured to run"
                    };
                    self.transition(job, JobState::Suspended, message, now, report)
                        .await?;
                }
                Ok(false)
            }
            Decision::Schedule => {
                if let Some(config) = stored {
                    self.launch(iapps, job, &config, now, report).await?;
                }
                Ok(false)
            }
            Decision::Idle => Ok(false),
        }
    }

    async fn launch(
        &self,
        iapps: &IAppSupport,
        job: &Job,
        config: &IAppConfig,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), MonitorError> {
        match iapps.launcher.launch(job, config).await {
            Ok(()) => {
                info!(job_id = %job.id, app = %config.app_name, etag = %config.etag, "launched integrated application");
                self.failed_launches.remove(&job.id);
                report.launched += 1;
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %job.id, app = %config.app_name, error = %e, "failed to launch integrated application");
                report.errors += 1;
                let already_reported = self
                    .failed_launches
                    .get(&job.id)
                    .is_some_and(|etag| *etag == config.etag);
                if !already_reported {
                    self.failed_launches
                        .insert(job.id.clone(), config.etag.clone());
                    let message = format!("Failed to start {}: {e}", config.app_name);
                    self.jobs
                        .track_update(&job.id, JobUpdate::message(now, message))
                        .await?;
                }
                Ok(())
            }
        }
    }

    fn record_iapp_state(&self, job: &Job, app: &str, next: IAppState) {
        let previous = self.iapp_states.insert(job.id.clone(), next);
        if previous != Some(next) {
            debug!(job_id = %job.id, app, state = %next, "integrated application state changed");
        }
    }

    async fn publish_progress(&self, job: &Job, pods: &[&Pod], now: DateTime<Utc>) {
        let Some(estimator) = &self.estimator else {
            return;
        };
        let Some(rank0) = pods.first() else {
            return;
        };
        if let Some(text) = estimator.estimate(rank0, now).await {
            self.jobs.ephemeral_status(&job.id, 0, &text).await;
        }
    }

    async fn transition(
        &self,
        job: &Job,
        state: JobState,
        message: &str,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Result<(), MonitorError> {
        if job.status.state == state {
            return Ok(());
        }
        info!(job_id = %job.id, from = %job.status.state, to = %state, "job state changed");
        self.jobs
            .track_update(&job.id, JobUpdate::state(state, now, message))
            .await?;
        report.transitions += 1;
        Ok(())
    }

    async fn terminate(&self, job_id: &str, pods: &[&Pod], report: &mut PassReport) {
        match self.terminator.terminate(job_id, pods).await {
            Ok(()) => report.terminated += 1,
            Err(e) => {
                warn!(job_id, error = %e, "termination incomplete, retrying next pass");
                report.errors += 1;
            }
        }
    }
}

/// Live replicas grouped by job id, sorted by rank
///
/// Pods that do not follow the naming protocol belong to something else.
/// Pods already being deleted are not live.
fn group_by_job(pods: &[Pod]) -> BTreeMap<String, Vec<&Pod>> {
    let mut groups: BTreeMap<String, Vec<(u32, &Pod)>> = BTreeMap::new();
    for pod in pods {
        if pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let Some(workload) = pod.metadata.name.as_deref().and_then(parse_workload_name) else {
            continue;
        };
        groups
            .entry(workload.job_id)
            .or_default()
            .push((workload.rank, pod));
    }
    groups
        .into_iter()
        .map(|(job_id, mut replicas)| {
            replicas.sort_by_key(|(rank, _)| *rank);
            (job_id, replicas.into_iter().map(|(_, pod)| pod).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMonitorKubeClient;
    use crate::test_support::{job, pod, MockJobs};
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap as Map;
    use ucloud_common::model::SimpleDuration;
    use ucloud_iapp::config::{IAppSettings, TerminalSettings};
    use ucloud_iapp::store::InMemoryConfigStore;
    use ucloud_iapp::Terminal;

    fn client_with(pods: Vec<Pod>) -> MockMonitorKubeClient {
        let mut client = MockMonitorKubeClient::new();
        client.expect_list_pods().returning(move || Ok(pods.clone()));
        client
    }

    fn expect_termination(client: &mut MockMonitorKubeClient, pods: usize) {
        client
            .expect_delete_pod()
            .times(pods)
            .returning(|_| Ok(()));
        client.expect_delete_service().times(4).returning(|_| Ok(()));
        client
            .expect_delete_network_policy()
            .times(1)
            .returning(|_| Ok(()));
    }

    fn jobs_with(active: Vec<Job>) -> MockJobs {
        let mut jobs = MockJobs::new();
        jobs.expect_active_jobs()
            .returning(move || Ok(active.clone()));
        jobs
    }

    // =========================================================================
    // Grouping
    // =========================================================================

    #[test]
    fn test_grouping_ignores_foreign_and_deleting_pods() {
        let mut deleting = pod("3", 0, "Running");
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
        );
        let mut foreign = pod("1", 0, "Running");
        foreign.metadata.name = Some("postgres-0".to_string());

        let pods = vec![pod("1", 1, "Running"), pod("1", 0, "Pending"), foreign, deleting];
        let groups = group_by_job(&pods);

        assert_eq!(groups.len(), 1);
        let ranks: Vec<_> = groups["1"]
            .iter()
            .map(|p| p.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(ranks, vec!["j-1-job-0", "j-1-job-1"]);
    }

    // =========================================================================
    // Phase mirroring
    // =========================================================================

    #[tokio::test]
    async fn story_running_pods_move_job_to_running_once() {
        let client = client_with(vec![pod("1", 0, "Running"), pod("1", 1, "Running")]);
        let mut jobs = jobs_with(vec![job("1", 2)]);
        jobs.expect_track_update()
            .withf(|id, u| id.to_string() == "1" && u.state == Some(JobState::Running))
            .times(1)
            .returning(|_, _| Ok(()));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.workloads, 2);
        assert_eq!(report.transitions, 1);
    }

    #[tokio::test]
    async fn story_no_transition_when_state_already_matches() {
        let client = client_with(vec![pod("1", 0, "Running")]);
        let mut running = job("1", 1);
        running.status.state = JobState::Running;
        running.status.started_at = Some(Utc::now());
        let mut jobs = jobs_with(vec![running]);
        jobs.expect_track_update().never();

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.transitions, 0);
    }

    #[tokio::test]
    async fn story_failed_replica_fails_the_gang_and_cleans_up() {
        let mut client = client_with(vec![pod("1", 0, "Running"), pod("1", 1, "Failed")]);
        expect_termination(&mut client, 2);
        let mut jobs = jobs_with(vec![job("1", 2)]);
        jobs.expect_track_update()
            .withf(|_, u| u.state == Some(JobState::Failure))
            .times(1)
            .returning(|_, _| Ok(()));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.terminated, 1);
    }

    // =========================================================================
    // Orphans and expiry
    // =========================================================================

    #[tokio::test]
    async fn story_workloads_without_a_job_are_removed() {
        let mut client = client_with(vec![pod("77", 0, "Running")]);
        expect_termination(&mut client, 1);
        let mut jobs = jobs_with(vec![]);
        jobs.expect_track_update().never();

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.orphans, 1);
        assert_eq!(report.terminated, 1);
    }

    #[tokio::test]
    async fn story_expired_job_is_cleaned_up_without_phase_transition() {
        let now = Utc::now();
        let mut client = client_with(vec![pod("5", 0, "Succeeded")]);
        expect_termination(&mut client, 1);

        let mut expired = job("5", 1);
        expired.status.state = JobState::Running;
        expired.status.started_at = Some(now - ChronoDuration::hours(2));
        expired.specification.time_allocation = Some(SimpleDuration {
            hours: 1,
            minutes: 0,
            seconds: 0,
        });
        let mut jobs = jobs_with(vec![expired]);
        jobs.expect_track_update()
            .withf(|_, u| u.state == Some(JobState::Expired))
            .times(1)
            .returning(|_, _| Ok(()));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(now).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.terminated, 1);
        assert_eq!(report.transitions, 1);
    }

    #[tokio::test]
    async fn story_cluster_listing_failure_aborts_the_pass() {
        let mut client = MockMonitorKubeClient::new();
        client
            .expect_list_pods()
            .returning(|| Err(Error::timeout("list pods", Duration::from_secs(5))));
        let mut jobs = MockJobs::new();
        jobs.expect_active_jobs().never();

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let err = monitor.run_pass(Utc::now()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Observe { what: "workloads", .. }));
    }

    #[tokio::test]
    async fn story_termination_failure_is_counted_not_fatal() {
        let mut client = client_with(vec![pod("77", 0, "Running")]);
        client
            .expect_delete_pod()
            .returning(|_| Err(Error::timeout("delete pod", Duration::from_secs(15))));
        client.expect_delete_service().returning(|_| Ok(()));
        client.expect_delete_network_policy().returning(|_| Ok(()));
        let jobs = jobs_with(vec![]);

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs));
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.terminated, 0);
    }

    // =========================================================================
    // Integrated applications
    // =========================================================================

    struct Storage;

    impl ucloud_common::collaborators::PathResolver for Storage {
        fn virtual_to_internal(&self, path: &str) -> Option<String> {
            path.starts_with("/1/").then(|| format!("/storage{path}"))
        }

        fn internal_to_virtual(&self, _drive: &str, path: &str) -> Option<String> {
            path.strip_prefix("/storage").map(str::to_string)
        }
    }

    fn registry() -> IAppRegistry {
        IAppRegistry::new().with(Arc::new(Terminal::new(true, "term", Arc::new(Storage))))
    }

    fn terminal_job(id: &str) -> Job {
        let mut j = job(id, 1);
        j.specification.product.category = "terminal".to_string();
        j
    }

    fn folder(path: &str) -> IAppSettings {
        IAppSettings::Terminal(TerminalSettings {
            folder: path.to_string(),
        })
    }

    fn with_etag(mut pod: Pod, etag: &str) -> Pod {
        pod.metadata.annotations = Some(Map::from([(
            IAPP_ETAG_ANNOTATION.to_string(),
            etag.to_string(),
        )]));
        pod
    }

    #[tokio::test]
    async fn story_configured_app_without_workload_is_launched() {
        let store = Arc::new(InMemoryConfigStore::new());
        let config = store.put("4", folder("/1/home")).await.unwrap();

        let client = client_with(vec![]);
        let jobs = jobs_with(vec![terminal_job("4")]);
        let mut launcher = MockIAppLauncher::new();
        let etag = config.etag.clone();
        launcher
            .expect_launch()
            .withf(move |j, c| j.id == "4" && c.etag == etag)
            .times(1)
            .returning(|_, _| Ok(()));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs)).with_iapps(
            registry(),
            store,
            Arc::new(launcher),
        );
        let report = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(report.launched, 1);
        assert_eq!(monitor.iapp_state("4"), IAppState::Validating);
    }

    #[tokio::test]
    async fn story_stale_etag_stops_workload_and_suspends_job() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.put("4", folder("/1/home")).await.unwrap();

        let mut client = client_with(vec![with_etag(pod("4", 0, "Running"), "old")]);
        expect_termination(&mut client, 1);
        let mut running = terminal_job("4");
        running.status.state = JobState::Running;
        running.status.started_at = Some(Utc::now());
        let mut jobs = jobs_with(vec![running]);
        jobs.expect_track_update()
            .withf(|_, u| u.state == Some(JobState::Suspended))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut launcher = MockIAppLauncher::new();
        launcher.expect_launch().never();

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs)).with_iapps(
            registry(),
            store,
            Arc::new(launcher),
        );
        monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(monitor.iapp_state("4"), IAppState::Restarting);
    }

    #[tokio::test]
    async fn story_current_etag_mirrors_pod_state() {
        let store = Arc::new(InMemoryConfigStore::new());
        let config = store.put("4", folder("/1/home")).await.unwrap();

        let client = client_with(vec![with_etag(pod("4", 0, "Running"), &config.etag)]);
        let mut suspended = terminal_job("4");
        suspended.status.state = JobState::Suspended;
        let mut jobs = jobs_with(vec![suspended]);
        jobs.expect_track_update()
            .withf(|_, u| u.state == Some(JobState::Running))
            .times(1)
            .returning(|_, _| Ok(()));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs)).with_iapps(
            registry(),
            store,
            Arc::new(MockIAppLauncher::new()),
        );
        monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(monitor.iapp_state("4"), IAppState::Running);
    }

    #[tokio::test]
    async fn story_launch_failure_is_reported_once() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.put("4", folder("/1/home")).await.unwrap();

        let client = client_with(vec![]);
        let mut jobs = jobs_with(vec![terminal_job("4")]);
        jobs.expect_track_update()
            .withf(|_, u| u.state.is_none())
            .times(1)
            .returning(|_, _| Ok(()));
        let mut launcher = MockIAppLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|_, _| Err(Error::internal("no capacity")));

        let monitor = Monitor::new(Arc::new(client), Arc::new(jobs)).with_iapps(
            registry(),
            store,
            Arc::new(launcher),
        );
        let first = monitor.run_pass(Utc::now()).await.unwrap();
        let second = monitor.run_pass(Utc::now()).await.unwrap();
        assert_eq!(first.errors, 1);
        assert_eq!(second.errors, 1);
    }
}

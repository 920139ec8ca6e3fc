//! UCloud compute backend

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::Api;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ucloud_common::config::ComputeConfig;
use ucloud_common::kube_utils::create_client;
use ucloud_common::telemetry::{init_telemetry, TelemetryMode};
use ucloud_common::tracker::ResourceTracker;
use ucloud_common::JOB_ID_LABEL;
use ucloud_iapp::InMemoryConfigStore;
use ucloud_monitor::{Monitor, MonitorKubeClient, MonitorKubeClientImpl};
use ucloud_operator::jobs::{load_job, LocalJobs};
use ucloud_operator::launcher::ClusterLauncher;
use ucloud_operator::resolver::DriveTable;
use ucloud_operator::{build_registry, Allocators};
use ucloud_workload::{JobCompiler, WorkloadKubeClientImpl};

/// UCloud compute backend for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "ucloud-compute", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile jobs against the cluster until interrupted
    Run {
        /// Compute configuration file
        #[arg(long, env = "UCLOUD_COMPUTE_CONFIG")]
        config: PathBuf,

        /// Directory of job documents
        #[arg(long)]
        jobs: Option<PathBuf>,

        /// Drive table entry, DRIVE=DIR relative to the shared file system
        #[arg(long = "drive", value_parser = DriveTable::parse_entry)]
        drives: Vec<(String, String)>,

        /// Kubeconfig to use instead of the in-cluster configuration
        #[arg(long, env = "KUBECONFIG")]
        kubeconfig: Option<PathBuf>,
    },

    /// Print the objects one rank of a job compiles to
    Render {
        /// Compute configuration file
        #[arg(long)]
        config: PathBuf,

        /// Job document
        #[arg(long)]
        job: PathBuf,

        /// Replica rank
        #[arg(long, default_value_t = 0)]
        rank: u32,

        /// Drive table entry, DRIVE=DIR relative to the shared file system
        #[arg(long = "drive", value_parser = DriveTable::parse_entry)]
        drives: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            jobs,
            drives,
            kubeconfig,
        } => run(&config, jobs.as_deref(), drives, kubeconfig.as_deref()).await,
        Commands::Render {
            config,
            job,
            rank,
            drives,
        } => {
            let _telemetry = init_telemetry(TelemetryMode::Command)?;
            render(&config, &job, rank, drives)
        }
    }
}

async fn run(
    config_path: &Path,
    jobs_dir: Option<&Path>,
    drives: Vec<(String, String)>,
    kubeconfig: Option<&Path>,
) -> anyhow::Result<()> {
    let config = Arc::new(ComputeConfig::load(config_path)?);
    let _telemetry = init_telemetry(TelemetryMode::service(&config.namespace))?;
    let client = create_client(kubeconfig).await?;
    let resolver = Arc::new(DriveTable::new(drives));
    let cancel = CancellationToken::new();

    let jobs = Arc::new(match jobs_dir {
        Some(dir) => LocalJobs::load_dir(dir)?,
        None => LocalJobs::default(),
    });

    // Ports in use are only known from live pods
    let allocators = Allocators::from_config(&config);
    let live = MonitorKubeClientImpl::new(client.clone(), &config.namespace)
        .list_pods()
        .await
        .context("listing live workloads")?;
    for allocator in allocators.all() {
        allocator.rebuild(&live);
    }
    info!(pods = live.len(), "rebuilt port allocators");

    let pods = ResourceTracker::<Pod>::by_name("pod");
    let tracker = tokio::spawn(pods.clone().run(
        Api::namespaced(client.clone(), &config.namespace),
        watcher::Config::default().labels(JOB_ID_LABEL),
        config.tracker_backoff(),
        cancel.clone(),
    ));

    let registry = build_registry(&config, resolver.clone(), &allocators);
    let workloads = Arc::new(WorkloadKubeClientImpl::new(client.clone(), &config.namespace));
    let mut launcher =
        ClusterLauncher::new(config.clone(), registry.clone(), resolver, workloads);
    if let Some(ssh) = &allocators.ssh {
        launcher = launcher.with_ssh_ports(ssh.clone());
    }

    let monitor_client =
        MonitorKubeClientImpl::new(client, &config.namespace).with_tracker(pods);
    let mut monitor = Monitor::new(Arc::new(monitor_client), jobs).with_iapps(
        registry,
        Arc::new(InMemoryConfigStore::new()),
        Arc::new(launcher),
    );
    for allocator in allocators.all() {
        monitor = monitor.with_allocator(allocator.clone());
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutting down");
        shutdown.cancel();
    });

    monitor.run(config.monitor_interval(), cancel.clone()).await;
    cancel.cancel();
    tracker.await.context("resource tracker panicked")?;
    Ok(())
}

fn render(
    config_path: &Path,
    job_path: &Path,
    rank: u32,
    drives: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let config = ComputeConfig::load(config_path)?;
    let job = load_job(job_path)?;
    let resolver = DriveTable::new(drives);
    let allocators = Allocators::from_config(&config);

    let mut compiler = JobCompiler::new(&job, rank, &config, &resolver);
    if let Some(ssh) = &allocators.ssh {
        compiler = compiler.with_ssh_ports(ssh);
    }
    let compiled = compiler.compile()?;

    print_yaml(&compiled.pod)?;
    if let Some(policy) = &compiled.firewall {
        print_yaml(policy)?;
    }
    for service in compiled.services() {
        print_yaml(service)?;
    }
    Ok(())
}

fn print_yaml<T: Serialize>(object: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(object).context("serializing object")?;
    println!("---\n{}", yaml.trim_end());
    Ok(())
}

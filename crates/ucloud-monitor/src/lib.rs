//! Reconciliation of UCloud jobs against their cluster workloads
//!
//! The [`Monitor`] runs one pass at a fixed interval. A pass never overlaps
//! the next, and nothing it does is fatal: failures are logged and the
//! following pass observes the cluster again.
//!
//! # Example
//!
//! ```rust,ignore
//! use ucloud_monitor::{Monitor, MonitorKubeClientImpl};
//!
//! let client = MonitorKubeClientImpl::new(kube_client, "ucloud-apps").with_tracker(pods);
//! let monitor = Monitor::new(Arc::new(client), jobs)
//!     .with_allocator(ssh_ports)
//!     .with_iapps(registry, store, launcher);
//! monitor.run(Duration::from_secs(5), cancel).await;
//! ```

pub mod client;
pub mod error;
mod monitor;
pub mod progress;
pub mod state;
mod termination;

pub use client::{MonitorKubeClient, MonitorKubeClientImpl};
pub use error::MonitorError;
pub use monitor::{IAppLauncher, Monitor, PassReport};
pub use progress::{ImageSizeSource, ProgressEstimator};
pub use termination::Terminator;

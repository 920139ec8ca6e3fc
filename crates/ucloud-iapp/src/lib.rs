//! Integrated applications for the UCloud compute backend
//!
//! An integrated application is a long-running workload attached to an
//! ordinary job through stored configuration rather than through its own
//! lifecycle API. Handlers hook into compilation through [`IAppExtension`]
//! and are driven by the monitor through [`evaluate`].

pub mod config;
pub mod error;
mod handler;
mod registry;
pub mod state;
pub mod store;
pub mod syncthing;
pub mod terminal;

pub use config::{IAppConfig, IAppSettings};
pub use error::IAppError;
pub use handler::{IAppExtension, IntegratedApplication};
pub use registry::IAppRegistry;
pub use state::{evaluate, Decision, IAppState};
pub use store::{IAppConfigStore, InMemoryConfigStore};
pub use syncthing::Syncthing;
pub use terminal::Terminal;

//! Configuration storage keyed by job id
//!
//! Every write replaces the etag. A running workload whose recorded etag no
//! longer matches the stored one is stale.

use async_trait::async_trait;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;

use ucloud_common::Error;

use crate::config::{new_etag, IAppConfig, IAppSettings};

/// Persistence of integrated application configuration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IAppConfigStore: Send + Sync {
    /// The configuration attached to a job
    async fn get(&self, job_id: &str) -> Result<Option<IAppConfig>, Error>;

    /// Store settings under a new etag
    async fn put(&self, job_id: &str, settings: IAppSettings) -> Result<IAppConfig, Error>;

    /// Detach the configuration from a job
    async fn remove(&self, job_id: &str) -> Result<Option<IAppConfig>, Error>;

    /// Every stored configuration
    async fn list(&self) -> Result<Vec<IAppConfig>, Error>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: DashMap<String, IAppConfig>,
}

impl InMemoryConfigStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IAppConfigStore for InMemoryConfigStore {
    async fn get(&self, job_id: &str) -> Result<Option<IAppConfig>, Error> {
        Ok(self.configs.get(job_id).map(|c| c.value().clone()))
    }

    async fn put(&self, job_id: &str, settings: IAppSettings) -> Result<IAppConfig, Error> {
        let config = IAppConfig {
            job_id: job_id.to_string(),
            app_name: settings.app_name().to_string(),
            settings,
            etag: new_etag(),
        };
        self.configs.insert(job_id.to_string(), config.clone());
        Ok(config)
    }

    async fn remove(&self, job_id: &str) -> Result<Option<IAppConfig>, Error> {
        Ok(self.configs.remove(job_id).map(|(_, c)| c))
    }

    async fn list(&self) -> Result<Vec<IAppConfig>, Error> {
        let mut all: Vec<IAppConfig> = self.configs.iter().map(|c| c.value().clone()).collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(all)
    }
}

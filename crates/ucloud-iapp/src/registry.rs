//! Name-keyed registry of integrated application handlers
//!
//! A job runs as an integrated application when its product category names a
//! registered handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use ucloud_common::model::Job;

use crate::config::{IAppConfig, IAppSettings};
use crate::error::IAppError;
use crate::handler::IntegratedApplication;
use crate::state::IAppState;
use crate::store::IAppConfigStore;

/// Handlers keyed by name
#[derive(Clone, Default)]
pub struct IAppRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn IntegratedApplication>>,
}

impl IAppRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, replacing any with the same name
    pub fn register(&mut self, handler: Arc<dyn IntegratedApplication>) {
        debug!(app = handler.name(), "registered integrated application");
        self.handlers.insert(handler.name(), handler);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, handler: Arc<dyn IntegratedApplication>) -> Self {
        self.register(handler);
        self
    }

    /// Handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn IntegratedApplication>> {
        self.handlers.get(name).cloned()
    }

    /// Handler responsible for a job, if the job is an integrated application
    pub fn for_job(&self, job: &Job) -> Option<Arc<dyn IntegratedApplication>> {
        self.get(&job.specification.product.category)
    }

    /// Registered names in order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn require(&self, job: &Job) -> Result<Arc<dyn IntegratedApplication>, IAppError> {
        self.for_job(job).ok_or_else(|| IAppError::UnknownApplication {
            name: job.specification.product.category.clone(),
        })
    }

    /// Validate and store new settings for a job
    ///
    /// Passes through [`IAppState::Validating`]; nothing is stored when
    /// validation fails.
    pub async fn configure(
        &self,
        store: &dyn IAppConfigStore,
        job: &Job,
        settings: IAppSettings,
    ) -> Result<IAppConfig, IAppError> {
        let handler = self.require(job)?;
        debug!(job_id = %job.id, app = handler.name(), state = %IAppState::Validating, "validating configuration");
        if settings.app_name() != handler.name() {
            return Err(IAppError::invalid(
                handler.name(),
                &job.id,
                format!("settings are for {}", settings.app_name()),
            ));
        }
        handler.validate_configuration(job, &settings)?;
        let config = store.put(&job.id, settings).await?;
        info!(job_id = %job.id, app = handler.name(), etag = %config.etag, "stored configuration");
        Ok(config)
    }

    /// The stored configuration, storing the default when there is none
    pub async fn current_or_default(
        &self,
        store: &dyn IAppConfigStore,
        job: &Job,
    ) -> Result<IAppConfig, IAppError> {
        if let Some(config) = store.get(&job.id).await? {
            return Ok(config);
        }
        let handler = self.require(job)?;
        Ok(store.put(&job.id, handler.default_configuration(job)).await?)
    }

    /// Reset a job's configuration
    pub async fn reset(
        &self,
        store: &dyn IAppConfigStore,
        job: &Job,
    ) -> Result<IAppConfig, IAppError> {
        let handler = self.require(job)?;
        let current = match store.get(&job.id).await? {
            Some(config) => config.settings,
            None => handler.default_configuration(job),
        };
        let settings = handler.reset_configuration(job, &current).await?;
        let config = store.put(&job.id, settings).await?;
        info!(job_id = %job.id, app = handler.name(), "reset configuration");
        Ok(config)
    }

    /// Give every handler a look at the live pods before a monitor pass
    pub fn before_monitor_pass(&self, pods: &[Pod]) {
        for handler in self.handlers.values() {
            handler.before_monitor_pass(pods);
        }
    }
}

impl std::fmt::Debug for IAppRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IAppRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

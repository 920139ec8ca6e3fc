//! Interactive terminal integrated application
//!
//! Runs the terminal image with the chosen folder mounted as its working
//! directory. It runs for as long as it is configured with a folder; the
//! reset configuration has none and stops it.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, VolumeMount};

use ucloud_common::collaborators::PathResolver;
use ucloud_common::model::Job;
use ucloud_workload::mounts::{sub_path_of, FILESYSTEM_VOLUME};
use ucloud_workload::CompilationError;

use crate::config::{IAppConfig, IAppSettings, TerminalSettings};
use crate::error::IAppError;
use crate::handler::IntegratedApplication;

/// Registry key
pub const APP_NAME: &str = "terminal";

/// Where the folder is mounted
pub const TERMINAL_DIR: &str = "/work/terminal";

/// Terminal handler
pub struct Terminal {
    enabled: bool,
    image: String,
    resolver: Arc<dyn PathResolver>,
}

impl Terminal {
    /// Create the handler
    pub fn new(enabled: bool, image: impl Into<String>, resolver: Arc<dyn PathResolver>) -> Self {
        Self {
            enabled,
            image: image.into(),
            resolver,
        }
    }
}

#[async_trait]
impl IntegratedApplication for Terminal {
    fn name(&self) -> &'static str {
        APP_NAME
    }

    fn validate_configuration(&self, job: &Job, settings: &IAppSettings) -> Result<(), IAppError> {
        if !self.enabled {
            return Err(IAppError::Disabled {
                app: APP_NAME.to_string(),
            });
        }
        let IAppSettings::Terminal(settings) = settings else {
            return Err(IAppError::invalid(APP_NAME, &job.id, "expected terminal settings"));
        };
        if self.resolver.virtual_to_internal(&settings.folder).is_none() {
            return Err(IAppError::invalid(
                APP_NAME,
                &job.id,
                format!("unknown folder '{}'", settings.folder),
            ));
        }
        Ok(())
    }

    fn default_configuration(&self, _job: &Job) -> IAppSettings {
        IAppSettings::Terminal(TerminalSettings::default())
    }

    async fn reset_configuration(
        &self,
        job: &Job,
        _current: &IAppSettings,
    ) -> Result<IAppSettings, IAppError> {
        Ok(self.default_configuration(job))
    }

    fn should_run(&self, _job: &Job, config: &IAppConfig) -> bool {
        matches!(&config.settings, IAppSettings::Terminal(s) if !s.folder.is_empty())
    }

    fn mutate_pod(
        &self,
        job: &Job,
        config: &IAppConfig,
        _rank: u32,
        pod: &mut Pod,
    ) -> Result<(), CompilationError> {
        let IAppSettings::Terminal(settings) = &config.settings else {
            return Err(CompilationError::Extension {
                app: APP_NAME.to_string(),
                job: job.id.clone(),
                message: "stored configuration is not for the terminal".to_string(),
            });
        };
        let internal = self
            .resolver
            .virtual_to_internal(&settings.folder)
            .ok_or_else(|| CompilationError::UnknownMount {
                job: job.id.clone(),
                path: settings.folder.clone(),
            })?;

        let container = pod
            .spec
            .as_mut()
            .and_then(|s| s.containers.first_mut())
            .ok_or_else(|| CompilationError::Extension {
                app: APP_NAME.to_string(),
                job: job.id.clone(),
                message: "pod has no container".to_string(),
            })?;
        container.image = Some(self.image.clone());
        container.command = None;
        container.working_dir = Some(TERMINAL_DIR.to_string());
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: FILESYSTEM_VOLUME.to_string(),
                mount_path: TERMINAL_DIR.to_string(),
                sub_path: Some(sub_path_of(&internal)),
                ..Default::default()
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{job, pod, StaticResolver};

    fn config(folder: &str) -> IAppConfig {
        IAppConfig {
            job_id: "3".to_string(),
            app_name: APP_NAME.to_string(),
            settings: IAppSettings::Terminal(TerminalSettings {
                folder: folder.to_string(),
            }),
            etag: "e".to_string(),
        }
    }

    #[test]
    fn test_disabled_terminal_rejects_configuration() {
        let h = Terminal::new(false, "term:1", Arc::new(StaticResolver));
        let err = h
            .validate_configuration(&job("3"), &config("/1/home").settings)
            .unwrap_err();
        assert!(matches!(err, IAppError::Disabled { .. }));
    }

    #[test]
    fn test_runs_while_configured_with_a_folder() {
        let h = Terminal::new(true, "term:1", Arc::new(StaticResolver));
        assert!(h.should_run(&job("3"), &config("/1/home")));
        assert!(!h.should_run(&job("3"), &config("")));
    }

    #[tokio::test]
    async fn test_reset_configuration_stops_the_terminal() {
        let h = Terminal::new(true, "term:1", Arc::new(StaticResolver));
        let j = job("3");
        let settings = h
            .reset_configuration(&j, &config("/1/home").settings)
            .await
            .unwrap();
        let mut reset = config("/1/home");
        reset.settings = settings;
        assert!(!h.should_run(&j, &reset));
        assert!(h.mutate_pod(&j, &reset, 0, &mut pod("3")).is_err());
    }

    #[test]
    fn test_pod_opens_in_folder() {
        let h = Terminal::new(true, "term:1", Arc::new(StaticResolver));
        let mut p = pod("3");
        h.mutate_pod(&job("3"), &config("/1/home"), 0, &mut p).unwrap();
        let c = &p.spec.unwrap().containers[0];
        assert_eq!(c.image.as_deref(), Some("term:1"));
        assert_eq!(c.working_dir.as_deref(), Some(TERMINAL_DIR));
        let m = c.volume_mounts.as_ref().unwrap().last().unwrap();
        assert_eq!(m.sub_path.as_deref(), Some("storage/1/home"));
    }

    #[test]
    fn test_unknown_folder() {
        let h = Terminal::new(true, "term:1", Arc::new(StaticResolver));
        assert!(h
            .validate_configuration(&job("3"), &config("/7/x").settings)
            .is_err());
        let err = h
            .mutate_pod(&job("3"), &config("/7/x"), 0, &mut pod("3"))
            .unwrap_err();
        assert!(matches!(err, CompilationError::UnknownMount { .. }));
    }
}

//! Advisory progress text for jobs still waiting on their image
//!
//! Estimates are never authoritative. A missing size or a failing lookup
//! only means no text is published.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Pod;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use ucloud_common::Error;

/// Waiting reasons that mean the image is still being pulled
pub const PULL_REASONS: &[&str] = &["ContainerCreating", "PodInitializing", "ErrImagePull"];

/// Lookup of an image's compressed size in bytes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageSizeSource: Send + Sync {
    /// Compressed size, or `None` when the registry does not know the image
    async fn compressed_size(&self, image: &str) -> Result<Option<u64>, Error>;
}

/// Cache-backed download estimator
pub struct ProgressEstimator {
    source: Arc<dyn ImageSizeSource>,
    /// Megabytes per second
    speed: f64,
    sizes: DashMap<String, Option<u64>>,
}

impl ProgressEstimator {
    /// Create an estimator assuming `speed` MB/s
    pub fn new(source: Arc<dyn ImageSizeSource>, speed: f64) -> Self {
        Self {
            source,
            speed,
            sizes: DashMap::new(),
        }
    }

    async fn size_of(&self, image: &str) -> Option<u64> {
        if let Some(cached) = self.sizes.get(image) {
            return *cached;
        }
        match self.source.compressed_size(image).await {
            Ok(size) => {
                self.sizes.insert(image.to_string(), size);
                size
            }
            // Not cached, so the next pass tries again
            Err(e) => {
                debug!(image, error = %e, "image size lookup failed");
                None
            }
        }
    }

    /// Progress text for a pending pod, if it is pulling an image
    pub async fn estimate(&self, pod: &Pod, now: DateTime<Utc>) -> Option<String> {
        waiting_reason(pod)?;
        let image = main_image(pod)?;
        let size = self.size_of(image).await?;
        if size == 0 || self.speed <= 0.0 {
            return None;
        }

        let created = pod.metadata.creation_timestamp.as_ref()?.0;
        let elapsed = (now - created).num_milliseconds().max(0) as f64 / 1000.0;
        let size_mb = size as f64 / 1_000_000.0;
        let downloaded = elapsed * self.speed;
        let percent = ((downloaded / size_mb) * 100.0).clamp(0.0, 99.0);
        let remaining = ((size_mb - downloaded) / self.speed).max(0.0);

        Some(format!(
            "Downloading software ({:.0}% of {:.0} MB, about {:.0}s remaining)",
            percent, size_mb, remaining
        ))
    }
}

/// The first image-pull waiting reason among the pod's containers
pub fn waiting_reason(pod: &Pod) -> Option<&str> {
    let status = pod.status.as_ref()?;
    status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
        .find(|reason| PULL_REASONS.contains(reason))
}

fn main_image(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref()?.containers.first()?.image.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateWaiting, ContainerStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pending(reason: &str, created: DateTime<Utc>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("j-1-job-0".to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "user-job".to_string(),
                    image: Some("dreg.cloud.sdu.dk/app:1".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "user-job".to_string(),
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some(reason.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pull_reasons_are_detected() {
        let now = Utc::now();
        assert_eq!(
            waiting_reason(&pending("ContainerCreating", now)),
            Some("ContainerCreating")
        );
        assert_eq!(waiting_reason(&pending("CrashLoopBackOff", now)), None);
        assert_eq!(waiting_reason(&Pod::default()), None);
    }

    #[tokio::test]
    async fn test_estimate_uses_elapsed_time_and_speed() {
        let mut source = MockImageSizeSource::new();
        source
            .expect_compressed_size()
            .times(1)
            .returning(|_| Ok(Some(100_000_000)));
        let estimator = ProgressEstimator::new(Arc::new(source), 10.0);

        let now = Utc::now();
        let pod = pending("ContainerCreating", now - Duration::seconds(5));
        let text = estimator.estimate(&pod, now).await.unwrap();
        assert!(text.contains("50%"), "{text}");
        assert!(text.contains("100 MB"), "{text}");

        // Second call is served from the cache
        let text = estimator.estimate(&pod, now).await.unwrap();
        assert!(text.contains("50%"));
    }

    #[tokio::test]
    async fn test_estimate_caps_below_complete() {
        let mut source = MockImageSizeSource::new();
        source.expect_compressed_size().returning(|_| Ok(Some(1_000_000)));
        let estimator = ProgressEstimator::new(Arc::new(source), 10.0);

        let now = Utc::now();
        let pod = pending("PodInitializing", now - Duration::seconds(60));
        let text = estimator.estimate(&pod, now).await.unwrap();
        assert!(text.contains("99%"), "{text}");
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_nothing_and_is_retried() {
        let mut source = MockImageSizeSource::new();
        source
            .expect_compressed_size()
            .times(2)
            .returning(|_| Err(Error::internal("registry unreachable")));
        let estimator = ProgressEstimator::new(Arc::new(source), 10.0);

        let now = Utc::now();
        let pod = pending("ErrImagePull", now);
        assert!(estimator.estimate(&pod, now).await.is_none());
        assert!(estimator.estimate(&pod, now).await.is_none());
    }

    #[tokio::test]
    async fn test_running_containers_are_not_estimated() {
        let mut source = MockImageSizeSource::new();
        source.expect_compressed_size().never();
        let estimator = ProgressEstimator::new(Arc::new(source), 10.0);

        let now = Utc::now();
        assert!(estimator
            .estimate(&pending("CrashLoopBackOff", now), now)
            .await
            .is_none());
    }
}

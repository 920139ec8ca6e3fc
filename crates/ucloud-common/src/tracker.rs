//! Watch-backed cache of one cluster resource type
//!
//! The tracker keeps a map from a caller-supplied key to the latest object.
//! Consistency protocol:
//!
//! - `Init` takes the write lock and clears the map. The lock is held by the
//!   session across the whole initial list, so readers block rather than see
//!   a half-populated map.
//! - `InitApply` inserts under that held lock.
//! - `InitDone` (the bookmark) releases it. Releasing is idempotent.
//! - `Apply` and `Delete` each take their own short write lock.
//! - When the stream errors or ends the map is discarded and the watch is
//!   re-established after a fixed backoff.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type KeyFn<K> = Arc<dyn Fn(&K) -> Option<String> + Send + Sync>;

/// Per-connection state of a tracker
///
/// Holds the write guard while an initial resync is in progress.
pub struct TrackerSession<K> {
    resync: Option<OwnedRwLockWriteGuard<HashMap<String, K>>>,
}

impl<K> TrackerSession<K> {
    /// A session with no resync in progress
    pub fn new() -> Self {
        Self { resync: None }
    }

    /// Whether the session currently holds the resync lock
    pub fn is_resyncing(&self) -> bool {
        self.resync.is_some()
    }
}

impl<K> Default for TrackerSession<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Watch-backed map of one resource type
pub struct ResourceTracker<K> {
    kind: &'static str,
    map: Arc<RwLock<HashMap<String, K>>>,
    key_fn: KeyFn<K>,
}

impl<K> Clone for ResourceTracker<K> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            map: self.map.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<K> ResourceTracker<K>
where
    K: Clone + Send + Sync + 'static,
{
    /// Create a tracker keyed by `key_fn`; objects without a key are ignored
    pub fn new(
        kind: &'static str,
        key_fn: impl Fn(&K) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            map: Arc::new(RwLock::new(HashMap::new())),
            key_fn: Arc::new(key_fn),
        }
    }

    /// All tracked objects
    pub async fn snapshot(&self) -> Vec<K> {
        self.map.read().await.values().cloned().collect()
    }

    /// One tracked object
    pub async fn get(&self, key: &str) -> Option<K> {
        self.map.read().await.get(key).cloned()
    }

    /// Number of tracked objects
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    /// Whether nothing is tracked
    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    /// Apply one watch event
    pub async fn apply(&self, session: &mut TrackerSession<K>, event: Event<K>) {
        match event {
            Event::Init => {
                let mut guard = match session.resync.take() {
                    Some(guard) => guard,
                    None => self.map.clone().write_owned().await,
                };
                guard.clear();
                session.resync = Some(guard);
                debug!(kind = self.kind, "resync started");
            }
            Event::InitApply(obj) => {
                let Some(key) = (self.key_fn)(&obj) else {
                    return;
                };
                match session.resync.as_mut() {
                    Some(guard) => {
                        guard.insert(key, obj);
                    }
                    None => {
                        self.map.write().await.insert(key, obj);
                    }
                }
            }
            Event::InitDone => {
                if let Some(guard) = session.resync.take() {
                    let count = guard.len();
                    drop(guard);
                    info!(kind = self.kind, count, "resync complete");
                }
            }
            Event::Apply(obj) => {
                if let Some(key) = (self.key_fn)(&obj) {
                    self.map.write().await.insert(key, obj);
                }
            }
            Event::Delete(obj) => {
                if let Some(key) = (self.key_fn)(&obj) {
                    self.map.write().await.remove(&key);
                }
            }
        }
    }

    /// End a session and discard everything it built
    pub async fn reset(&self, session: TrackerSession<K>) {
        match session.resync {
            Some(mut guard) => guard.clear(),
            None => self.map.write().await.clear(),
        }
    }
}

impl<K> ResourceTracker<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    /// A tracker keyed by object name
    pub fn by_name(kind: &'static str) -> Self {
        Self::new(kind, |obj: &K| obj.meta().name.clone())
    }

    /// Watch `api` until `cancel` fires, reconnecting after `backoff`
    pub async fn run(
        self,
        api: Api<K>,
        config: watcher::Config,
        backoff: Duration,
        cancel: CancellationToken,
    ) {
        info!(kind = self.kind, "starting resource tracker");
        loop {
            let mut session = TrackerSession::new();
            let mut stream = watcher::watcher(api.clone(), config.clone()).boxed();

            let cancelled = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break true,
                    next = stream.next() => match next {
                        Some(Ok(event)) => self.apply(&mut session, event).await,
                        Some(Err(e)) => {
                            warn!(kind = self.kind, error = %e, "watch failed, discarding cache");
                            break false;
                        }
                        None => {
                            warn!(kind = self.kind, "watch stream ended, discarding cache");
                            break false;
                        }
                    },
                }
            };

            self.reset(session).await;
            if cancelled {
                info!(kind = self.kind, "resource tracker stopped");
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

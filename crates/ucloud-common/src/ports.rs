//! Ephemeral port allocation for features that expose a job outside the cluster
//!
//! The allocator has no durable store. Its used-set is rebuilt from the port
//! annotations on live pods at startup, so restarts neither leak ports nor
//! hand the same port out twice.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::metrics::{PORTS_ALLOCATED, PORT_EXHAUSTION};

/// Pick a free port in `[min, max]`
///
/// Probing starts at a uniformly random offset and walks the range linearly,
/// wrapping once. Returns `None` when every port is in `used` or the range is
/// empty.
pub fn allocate_port<R: Rng + ?Sized>(
    used: &HashSet<u16>,
    min: u16,
    max: u16,
    rng: &mut R,
) -> Option<u16> {
    if min > max {
        return None;
    }
    let size = u32::from(max) - u32::from(min) + 1;
    let offset = rng.gen_range(0..size);
    (0..size)
        .map(|i| min + ((offset + i) % size) as u16)
        .find(|port| !used.contains(port))
}

/// Shared allocator for one feature's port range
#[derive(Debug)]
pub struct PortAllocator {
    feature: &'static str,
    annotation: &'static str,
    min: u16,
    max: u16,
    used: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator for `feature`, recording ports under `annotation`
    pub fn new(feature: &'static str, annotation: &'static str, min: u16, max: u16) -> Self {
        Self {
            feature,
            annotation,
            min,
            max,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// The annotation key live pods carry their port under
    pub fn annotation(&self) -> &'static str {
        self.annotation
    }

    /// Replace the used-set with the ports annotated on `pods`
    pub fn rebuild<'a>(&self, pods: impl IntoIterator<Item = &'a Pod>) {
        let mut found = HashSet::new();
        for pod in pods {
            let Some(raw) = pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(self.annotation))
            else {
                continue;
            };
            match raw.parse::<u16>() {
                Ok(port) => {
                    found.insert(port);
                }
                Err(_) => warn!(
                    feature = self.feature,
                    value = %raw,
                    "ignoring unparseable port annotation"
                ),
            }
        }
        debug!(feature = self.feature, count = found.len(), "rebuilt port allocator");
        *self.used.lock() = found;
    }

    /// Allocate and commit a free port
    pub fn allocate(&self) -> Option<u16> {
        let mut used = self.used.lock();
        let port = allocate_port(&used, self.min, self.max, &mut rand::thread_rng());
        match port {
            Some(p) => {
                used.insert(p);
                PORTS_ALLOCATED.add(1, &[opentelemetry::KeyValue::new("feature", self.feature)]);
            }
            None => {
                PORT_EXHAUSTION.add(1, &[opentelemetry::KeyValue::new("feature", self.feature)]);
                warn!(feature = self.feature, min = self.min, max = self.max, "port range exhausted");
            }
        }
        port
    }

    /// Return a port to the pool
    pub fn release(&self, port: u16) {
        self.used.lock().remove(&port);
    }

    /// Whether `port` is currently handed out
    pub fn is_used(&self, port: u16) -> bool {
        self.used.lock().contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    const ANNOTATION: &str = "ucloud.dk/sshPort";

    fn pod_with_port(port: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("p-{port}")),
                annotations: Some(BTreeMap::from([(ANNOTATION.to_string(), port.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_never_returns_a_used_port() {
        let mut rng = StdRng::seed_from_u64(7);
        let used: HashSet<u16> = (100..=110).filter(|p| p % 2 == 0).collect();
        for _ in 0..200 {
            let port = allocate_port(&used, 100, 110, &mut rng).unwrap();
            assert!((100..=110).contains(&port));
            assert!(!used.contains(&port));
        }
    }

    #[test]
    fn test_exhausted_range_returns_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let used: HashSet<u16> = (2000..=2010).collect();
        assert_eq!(allocate_port(&used, 2000, 2010, &mut rng), None);
    }

    #[test]
    fn test_inverted_range_returns_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(allocate_port(&HashSet::new(), 10, 9, &mut rng), None);
    }

    #[test]
    fn test_full_u16_range_is_handled() {
        let mut rng = StdRng::seed_from_u64(3);
        let port = allocate_port(&HashSet::new(), 0, u16::MAX, &mut rng);
        assert!(port.is_some());
    }

    #[test]
    fn test_first_candidate_is_spread_over_the_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let seen: HashSet<u16> = (0..100)
            .filter_map(|_| allocate_port(&HashSet::new(), 5000, 5999, &mut rng))
            .collect();
        assert!(seen.len() > 50, "expected varied ports, got {}", seen.len());
    }

    #[test]
    fn test_allocator_hands_out_each_port_once() {
        let alloc = PortAllocator::new("ssh", ANNOTATION, 3000, 3004);
        let mut got: Vec<u16> = (0..5).filter_map(|_| alloc.allocate()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![3000, 3001, 3002, 3003, 3004]);
        assert_eq!(alloc.allocate(), None);

        alloc.release(3002);
        assert_eq!(alloc.allocate(), Some(3002));
    }

    #[test]
    fn test_rebuild_from_live_pods() {
        let alloc = PortAllocator::new("ssh", ANNOTATION, 3000, 3002);
        let pods = vec![pod_with_port("3000"), pod_with_port("3002"), pod_with_port("junk")];
        alloc.rebuild(&pods);

        assert!(alloc.is_used(3000));
        assert!(alloc.is_used(3002));
        assert_eq!(alloc.allocate(), Some(3001));
        assert_eq!(alloc.allocate(), None);
    }
}

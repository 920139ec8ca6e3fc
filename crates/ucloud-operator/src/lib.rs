//! Composition root of the UCloud compute backend
//!
//! Wires the compiler, the integrated applications, and the monitor to a
//! cluster, a job source, and a drive table.

pub mod jobs;
pub mod launcher;
pub mod resolver;

use std::sync::Arc;

use ucloud_common::collaborators::PathResolver;
use ucloud_common::config::ComputeConfig;
use ucloud_common::ports::PortAllocator;
use ucloud_common::{SSH_PORT_ANNOTATION, SYNCTHING_PORT_ANNOTATION};
use ucloud_iapp::{IAppRegistry, Syncthing, Terminal};

/// Port allocators for the features enabled in `config`
#[derive(Clone, Debug, Default)]
pub struct Allocators {
    /// SSH ports
    pub ssh: Option<Arc<PortAllocator>>,
    /// Syncthing ports
    pub syncthing: Option<Arc<PortAllocator>>,
}

impl Allocators {
    /// Create an allocator per enabled port feature
    pub fn from_config(config: &ComputeConfig) -> Self {
        let ssh = config
            .ssh
            .as_ref()
            .filter(|f| f.enabled)
            .map(|f| Arc::new(PortAllocator::new("ssh", SSH_PORT_ANNOTATION, f.port_min, f.port_max)));
        let syncthing = config.syncthing.as_ref().filter(|f| f.ports.enabled).map(|f| {
            Arc::new(PortAllocator::new(
                "syncthing",
                SYNCTHING_PORT_ANNOTATION,
                f.ports.port_min,
                f.ports.port_max,
            ))
        });
        Self { ssh, syncthing }
    }

    /// Every allocator
    pub fn all(&self) -> impl Iterator<Item = &Arc<PortAllocator>> {
        self.ssh.iter().chain(self.syncthing.iter())
    }
}

/// Registry holding every integrated application enabled in `config`
pub fn build_registry(
    config: &ComputeConfig,
    resolver: Arc<dyn PathResolver>,
    allocators: &Allocators,
) -> IAppRegistry {
    let mut registry = IAppRegistry::new();
    if config.integrated_terminal.enabled {
        registry.register(Arc::new(Terminal::new(
            true,
            config.images.terminal.clone(),
            resolver.clone(),
        )));
    }
    if let (Some(feature), Some(ports)) = (&config.syncthing, &allocators.syncthing) {
        registry.register(Arc::new(Syncthing::new(
            feature.clone(),
            config.images.syncthing.clone(),
            resolver,
            ports.clone(),
        )));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DriveTable;

    const CONFIG: &str = r#"
ssh:
  enabled: true
  ipAddress: 10.0.0.1
  portMin: 2000
  portMax: 2100
syncthing:
  enabled: false
  ipAddress: 10.0.0.2
  portMin: 21000
  portMax: 21100
integratedTerminal:
  enabled: true
"#;

    #[test]
    fn test_only_enabled_features_are_wired() {
        let config = ComputeConfig::from_yaml(CONFIG).unwrap();
        let allocators = Allocators::from_config(&config);
        assert!(allocators.ssh.is_some());
        assert!(allocators.syncthing.is_none());
        assert_eq!(allocators.all().count(), 1);

        let registry = build_registry(&config, Arc::new(DriveTable::default()), &allocators);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["terminal"]);
    }
}

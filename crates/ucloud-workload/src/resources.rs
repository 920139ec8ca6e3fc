//! CPU, memory and accelerator requests
//!
//! Requests always equal limits. There is no over- or under-subscription.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use ucloud_common::config::MachineSettings;
use ucloud_common::model::Product;

/// Resources granted to the user container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// CPU in millicores
    pub cpu_millis: u64,
    /// Memory in megabytes
    pub memory_mb: u64,
    /// Accelerator count
    pub gpus: u64,
    /// Extended resource name for accelerators
    pub gpu_resource: String,
}

impl Allocation {
    /// Size the container from the product, honouring the machine's CPU override
    pub fn for_product(product: &Product, machine: &MachineSettings) -> Self {
        let cpu_millis = machine
            .actual_cpu_millis
            .map(u64::from)
            .unwrap_or_else(|| u64::from(product.cpu) * 1000);
        Self {
            cpu_millis,
            memory_mb: u64::from(product.memory_in_gigs) * 1000,
            gpus: u64::from(product.gpu),
            gpu_resource: machine.gpu_resource_type.clone(),
        }
    }

    /// Memory as a quantity, also used to size `/dev/shm`
    pub fn memory_quantity(&self) -> Quantity {
        Quantity(format!("{}M", self.memory_mb))
    }

    /// Requests and limits with identical values
    pub fn requirements(&self) -> ResourceRequirements {
        let mut quantities = BTreeMap::new();
        quantities.insert("cpu".to_string(), Quantity(format!("{}m", self.cpu_millis)));
        quantities.insert("memory".to_string(), self.memory_quantity());
        if self.gpus > 0 {
            quantities.insert(self.gpu_resource.clone(), Quantity(self.gpus.to_string()));
        }

        ResourceRequirements {
            limits: Some(quantities.clone()),
            requests: Some(quantities),
            ..Default::default()
        }
    }
}

/// Fixed, small allocation for auxiliary init containers
pub fn auxiliary_requirements() -> ResourceRequirements {
    let limits = BTreeMap::from([
        ("cpu".to_string(), Quantity("100m".to_string())),
        ("memory".to_string(), Quantity("64M".to_string())),
    ]);
    ResourceRequirements {
        limits: Some(limits.clone()),
        requests: Some(limits),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(cpu: u32, mem: u32, gpu: u32) -> Product {
        Product {
            name: "m".to_string(),
            category: "c".to_string(),
            cpu,
            memory_in_gigs: mem,
            gpu,
        }
    }

    #[test]
    fn test_requests_equal_limits() {
        let alloc = Allocation::for_product(&product(4, 16, 0), &MachineSettings::default());
        let req = alloc.requirements();
        assert_eq!(req.requests, req.limits);

        let limits = req.limits.unwrap();
        assert_eq!(limits["cpu"], Quantity("4000m".to_string()));
        assert_eq!(limits["memory"], Quantity("16000M".to_string()));
        assert!(!limits.contains_key("nvidia.com/gpu"));
    }

    #[test]
    fn test_machine_override_and_gpu_type() {
        let machine = MachineSettings {
            actual_cpu_millis: Some(7500),
            gpu_resource_type: "amd.com/gpu".to_string(),
            runtime_class: None,
        };
        let alloc = Allocation::for_product(&product(8, 32, 2), &machine);
        let limits = alloc.requirements().limits.unwrap();
        assert_eq!(limits["cpu"], Quantity("7500m".to_string()));
        assert_eq!(limits["amd.com/gpu"], Quantity("2".to_string()));
    }
}

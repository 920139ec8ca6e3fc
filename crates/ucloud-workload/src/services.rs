//! Reachability objects
//!
//! The headless service gives every replica a stable DNS name under the
//! job's subdomain. SSH, public IP and sync daemon access get their own
//! services bound to external addresses.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use ucloud_common::model::PortRange;
use ucloud_common::naming::{ip_service_name, service_name, ssh_service_name, sync_service_name};
use ucloud_common::{JOB_ID_LABEL, RANK_LABEL};

/// Port the SSH daemon listens on inside the container
pub const SSH_CONTAINER_PORT: u16 = 22;

fn metadata(name: String, job_id: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            JOB_ID_LABEL.to_string(),
            job_id.to_string(),
        )])),
        ..Default::default()
    }
}

fn job_selector(job_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(JOB_ID_LABEL.to_string(), job_id.to_string())])
}

fn rank_zero_selector(job_id: &str) -> BTreeMap<String, String> {
    let mut selector = job_selector(job_id);
    selector.insert(RANK_LABEL.to_string(), "0".to_string());
    selector
}

fn tcp_port(name: String, port: u16, target: u16) -> ServicePort {
    service_port(name, "TCP", port, target)
}

fn service_port(name: String, protocol: &str, port: u16, target: u16) -> ServicePort {
    ServicePort {
        name: Some(name),
        protocol: Some(protocol.to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(target))),
        ..Default::default()
    }
}

/// Headless service selecting every replica of the job
///
/// Application ports, when declared, are exposed on it so in-cluster proxies
/// can reach the web or VNC interface.
pub fn headless_service(job_id: &str, namespace: &str, app_ports: &[(&str, u16)]) -> Service {
    let ports: Vec<ServicePort> = app_ports
        .iter()
        .map(|(name, port)| tcp_port((*name).to_string(), *port, *port))
        .collect();

    Service {
        metadata: metadata(service_name(job_id), job_id, namespace),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            type_: Some("ClusterIP".to_string()),
            selector: Some(job_selector(job_id)),
            ports: (!ports.is_empty()).then_some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing rank 0's SSH daemon on an allocated external port
pub fn ssh_service(job_id: &str, namespace: &str, external_ip: &str, port: u16) -> Service {
    Service {
        metadata: metadata(ssh_service_name(job_id), job_id, namespace),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            external_ips: Some(vec![external_ip.to_string()]),
            selector: Some(rank_zero_selector(job_id)),
            ports: Some(vec![tcp_port("ssh".to_string(), port, SSH_CONTAINER_PORT)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service binding a public IP to rank 0 on the declared port ranges
///
/// Every port is forwarded for both TCP and UDP, matching the network policy.
pub fn ip_service(job_id: &str, namespace: &str, ip_address: &str, ranges: &[PortRange]) -> Service {
    let ports = ranges
        .iter()
        .flat_map(|r| r.start..=r.end)
        .flat_map(|p| {
            [
                service_port(format!("tcp-{p}"), "TCP", p, p),
                service_port(format!("udp-{p}"), "UDP", p, p),
            ]
        })
        .collect();

    Service {
        metadata: metadata(ip_service_name(job_id), job_id, namespace),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            external_ips: Some(vec![ip_address.to_string()]),
            selector: Some(rank_zero_selector(job_id)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing rank 0's sync daemon on `port`, TCP and UDP
pub fn sync_service(job_id: &str, namespace: &str, external_ip: &str, port: u16) -> Service {
    Service {
        metadata: metadata(sync_service_name(job_id), job_id, namespace),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            external_ips: Some(vec![external_ip.to_string()]),
            selector: Some(rank_zero_selector(job_id)),
            ports: Some(vec![
                service_port("sync-tcp".to_string(), "TCP", port, port),
                service_port("sync-udp".to_string(), "UDP", port, port),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_service_selects_all_ranks() {
        let svc = headless_service("5", "apps", &[]);
        assert_eq!(svc.metadata.name.as_deref(), Some("j-5"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.selector.unwrap(), job_selector("5"));
        assert!(spec.ports.is_none());
    }

    #[test]
    fn test_headless_service_exposes_app_ports() {
        let svc = headless_service("5", "apps", &[("web", 8080)]);
        let ports = svc.spec.unwrap().ports.unwrap();
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].name.as_deref(), Some("web"));
    }

    #[test]
    fn test_ssh_service_forwards_to_port_22_on_rank_zero() {
        let svc = ssh_service("5", "apps", "10.0.0.1", 41022);
        assert_eq!(svc.metadata.name.as_deref(), Some("j-5-ssh"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.external_ips.unwrap(), vec!["10.0.0.1"]);
        assert_eq!(spec.selector.unwrap()[RANK_LABEL], "0");
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 41022);
        assert_eq!(port.target_port, Some(IntOrString::Int(22)));
    }

    #[test]
    fn test_ip_service_expands_ranges() {
        let svc = ip_service(
            "5",
            "apps",
            "203.0.113.7",
            &[PortRange { start: 80, end: 80 }, PortRange { start: 9000, end: 9002 }],
        );
        assert_eq!(svc.metadata.name.as_deref(), Some("j-5-ip"));
        let ports = svc.spec.unwrap().ports.unwrap();
        let tcp: Vec<i32> = ports
            .iter()
            .filter(|p| p.protocol.as_deref() == Some("TCP"))
            .map(|p| p.port)
            .collect();
        assert_eq!(tcp, vec![80, 9000, 9001, 9002]);
    }

    #[test]
    fn test_ip_service_forwards_udp_alongside_tcp() {
        let svc = ip_service("5", "apps", "203.0.113.7", &[PortRange { start: 53, end: 53 }]);
        let ports = svc.spec.unwrap().ports.unwrap();
        let forwarded: Vec<(Option<&str>, Option<&str>, i32)> = ports
            .iter()
            .map(|p| (p.name.as_deref(), p.protocol.as_deref(), p.port))
            .collect();
        assert_eq!(
            forwarded,
            vec![
                (Some("tcp-53"), Some("TCP"), 53),
                (Some("udp-53"), Some("UDP"), 53),
            ]
        );
    }

    #[test]
    fn test_sync_service_is_separate_from_headless_service() {
        let svc = sync_service("5", "apps", "10.9.9.9", 21000);
        assert_eq!(svc.metadata.name.as_deref(), Some("j-5-sync"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, None);
        assert_eq!(spec.external_ips.unwrap(), vec!["10.9.9.9"]);
        assert_eq!(spec.selector.unwrap()[RANK_LABEL], "0");
        let protocols: Vec<_> = spec
            .ports
            .unwrap()
            .into_iter()
            .map(|p| (p.protocol.unwrap(), p.port))
            .collect();
        assert_eq!(
            protocols,
            vec![("TCP".to_string(), 21000), ("UDP".to_string(), 21000)]
        );
    }
}

//! Network policy synthesis
//!
//! Each job gets one `NetworkPolicy`, owned by rank 0, selecting every replica
//! of the job. It allows traffic between the job's own replicas, between the
//! job and each declared peer, and from anywhere on explicitly bound ports.
//!
//! Peers that are already running had their policy sealed at their own
//! creation, so rules towards the new job are appended to it with JSON patch
//! `add` operations on `/spec/ingress/-` and `/spec/egress/-`. Those only
//! apply to a non-empty list, so every policy is seeded with a rule for a
//! documentation-only subnet that matches no real traffic.

use std::collections::BTreeMap;

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use ucloud_common::model::PortRange;
use ucloud_common::naming::firewall_name;
use ucloud_common::JOB_ID_LABEL;

/// Seed rule subnet (RFC 5737 TEST-NET-1)
pub const PLACEHOLDER_SUBNET: &str = "192.0.2.0/24";

/// CIDR matching every IPv4 source
pub const WORLD_SUBNET: &str = "0.0.0.0/0";

/// Transport protocol of a world-reachable port range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// A port range opened to the world
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldPort {
    /// Protocol
    pub protocol: Protocol,
    /// Ports
    pub range: PortRange,
}

impl WorldPort {
    /// A single TCP port
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            range: PortRange {
                start: port,
                end: port,
            },
        }
    }
}

/// Selector matching every replica of a job
pub fn job_selector(job_id: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            JOB_ID_LABEL.to_string(),
            job_id.to_string(),
        )])),
        ..Default::default()
    }
}

fn job_peer(job_id: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(job_selector(job_id)),
        ..Default::default()
    }
}

fn subnet_peer(cidr: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr: cidr.to_string(),
            except: None,
        }),
        ..Default::default()
    }
}

/// Ingress rule admitting any source on `ports`, `None` when there are none
pub fn world_rule(ports: &[WorldPort]) -> Option<NetworkPolicyIngressRule> {
    if ports.is_empty() {
        return None;
    }
    let ports = ports
        .iter()
        .map(|p| NetworkPolicyPort {
            protocol: Some(p.protocol.as_str().to_string()),
            port: Some(IntOrString::Int(i32::from(p.range.start))),
            end_port: (p.range.end > p.range.start).then(|| i32::from(p.range.end)),
        })
        .collect();
    Some(NetworkPolicyIngressRule {
        from: Some(vec![subnet_peer(WORLD_SUBNET)]),
        ports: Some(ports),
    })
}

/// Builder for a job's network policy
#[derive(Clone, Debug)]
pub struct FirewallBuilder {
    policy: NetworkPolicy,
}

impl FirewallBuilder {
    /// A policy for `job_id` allowing traffic among its own replicas, plus the seed rules
    pub fn new(job_id: &str, namespace: &str) -> Self {
        let policy = NetworkPolicy {
            metadata: ObjectMeta {
                name: Some(firewall_name(job_id)),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    JOB_ID_LABEL.to_string(),
                    job_id.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: job_selector(job_id),
                policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
                ingress: Some(vec![]),
                egress: Some(vec![]),
            }),
        };

        Self { policy }
            .allow_from_job(job_id)
            .allow_to_job(job_id)
            .allow_from_subnet(PLACEHOLDER_SUBNET)
            .allow_to_subnet(PLACEHOLDER_SUBNET)
    }

    fn spec(&mut self) -> &mut NetworkPolicySpec {
        self.policy.spec.get_or_insert_with(Default::default)
    }

    fn push_ingress(mut self, rule: NetworkPolicyIngressRule) -> Self {
        self.spec().ingress.get_or_insert_with(Vec::new).push(rule);
        self
    }

    fn push_egress(mut self, rule: NetworkPolicyEgressRule) -> Self {
        self.spec().egress.get_or_insert_with(Vec::new).push(rule);
        self
    }

    /// Allow ingress from every replica of `job_id`
    pub fn allow_from_job(self, job_id: &str) -> Self {
        self.push_ingress(NetworkPolicyIngressRule {
            from: Some(vec![job_peer(job_id)]),
            ports: None,
        })
    }

    /// Allow egress to every replica of `job_id`
    pub fn allow_to_job(self, job_id: &str) -> Self {
        self.push_egress(NetworkPolicyEgressRule {
            to: Some(vec![job_peer(job_id)]),
            ports: None,
        })
    }

    /// Allow ingress from a CIDR block
    pub fn allow_from_subnet(self, cidr: &str) -> Self {
        self.push_ingress(NetworkPolicyIngressRule {
            from: Some(vec![subnet_peer(cidr)]),
            ports: None,
        })
    }

    /// Allow egress to a CIDR block
    pub fn allow_to_subnet(self, cidr: &str) -> Self {
        self.push_egress(NetworkPolicyEgressRule {
            to: Some(vec![subnet_peer(cidr)]),
            ports: None,
        })
    }

    /// Allow bidirectional traffic with a peer job
    pub fn allow_peer(self, peer_job_id: &str) -> Self {
        self.allow_from_job(peer_job_id).allow_to_job(peer_job_id)
    }

    /// Allow ingress from anywhere on the given ports
    pub fn allow_from_world(self, ports: &[WorldPort]) -> Self {
        match world_rule(ports) {
            Some(rule) => self.push_ingress(rule),
            None => self,
        }
    }

    /// Finish the policy
    pub fn build(self) -> NetworkPolicy {
        self.policy
    }
}

/// Rules to append to a running peer's policy so it accepts a new job
#[derive(Clone, Debug)]
pub struct PeerPatch {
    /// The running peer
    pub peer_job_id: String,
    /// Name of the peer's policy
    pub policy_name: String,
    /// JSON patch operations
    pub patch: json_patch::Patch,
}

/// Append-only patch letting `peer_job_id`'s policy talk to `job_id`
///
/// Not idempotent: applying it twice duplicates the rules, which the
/// cluster treats the same as a single copy.
pub fn peer_back_patch(job_id: &str, peer_job_id: &str) -> PeerPatch {
    let ingress = NetworkPolicyIngressRule {
        from: Some(vec![job_peer(job_id)]),
        ports: None,
    };
    let egress = NetworkPolicyEgressRule {
        to: Some(vec![job_peer(job_id)]),
        ports: None,
    };

    let ops = vec![
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "ingress", "-"]),
            value: serde_json::to_value(ingress).unwrap_or_default(),
        }),
        PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["spec", "egress", "-"]),
            value: serde_json::to_value(egress).unwrap_or_default(),
        }),
    ];

    PeerPatch {
        peer_job_id: peer_job_id.to_string(),
        policy_name: firewall_name(peer_job_id),
        patch: json_patch::Patch(ops),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingress(p: &NetworkPolicy) -> &Vec<NetworkPolicyIngressRule> {
        p.spec.as_ref().unwrap().ingress.as_ref().unwrap()
    }

    fn egress(p: &NetworkPolicy) -> &Vec<NetworkPolicyEgressRule> {
        p.spec.as_ref().unwrap().egress.as_ref().unwrap()
    }

    fn cidr_of(peer: &NetworkPolicyPeer) -> Option<&str> {
        peer.ip_block.as_ref().map(|b| b.cidr.as_str())
    }

    #[test]
    fn test_new_policy_is_seeded_and_self_connected() {
        let p = FirewallBuilder::new("10", "apps").build();
        assert_eq!(p.metadata.name.as_deref(), Some("policy-10"));

        let ing = ingress(&p);
        assert_eq!(ing.len(), 2);
        assert_eq!(
            ing[0].from.as_ref().unwrap()[0].pod_selector,
            Some(job_selector("10"))
        );
        assert_eq!(
            cidr_of(&ing[1].from.as_ref().unwrap()[0]),
            Some(PLACEHOLDER_SUBNET)
        );

        let eg = egress(&p);
        assert_eq!(eg.len(), 2);
        assert_eq!(cidr_of(&eg[1].to.as_ref().unwrap()[0]), Some(PLACEHOLDER_SUBNET));
    }

    #[test]
    fn test_peers_are_bidirectional() {
        let p = FirewallBuilder::new("10", "apps").allow_peer("11").build();
        assert!(ingress(&p)
            .iter()
            .any(|r| r.from.as_ref().unwrap()[0].pod_selector == Some(job_selector("11"))));
        assert!(egress(&p)
            .iter()
            .any(|r| r.to.as_ref().unwrap()[0].pod_selector == Some(job_selector("11"))));
    }

    #[test]
    fn test_world_rule_uses_port_ranges() {
        let p = FirewallBuilder::new("10", "apps")
            .allow_from_world(&[
                WorldPort::tcp(22),
                WorldPort {
                    protocol: Protocol::Udp,
                    range: PortRange {
                        start: 8000,
                        end: 8010,
                    },
                },
            ])
            .build();

        let rule = ingress(&p).last().unwrap();
        assert_eq!(cidr_of(&rule.from.as_ref().unwrap()[0]), Some(WORLD_SUBNET));
        let ports = rule.ports.as_ref().unwrap();
        assert_eq!(ports[0].port, Some(IntOrString::Int(22)));
        assert_eq!(ports[0].end_port, None);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(ports[1].end_port, Some(8010));
        assert_eq!(ports[1].protocol.as_deref(), Some("UDP"));
    }

    #[test]
    fn test_empty_world_ports_add_nothing() {
        let p = FirewallBuilder::new("10", "apps").allow_from_world(&[]).build();
        assert_eq!(ingress(&p).len(), 2);
    }

    #[test]
    fn test_peer_back_patch_appends_to_both_lists() {
        let patch = peer_back_patch("20", "11");
        assert_eq!(patch.policy_name, "policy-11");

        let json = serde_json::to_value(&patch.patch).unwrap();
        assert_eq!(json[0]["op"], "add");
        assert_eq!(json[0]["path"], "/spec/ingress/-");
        assert_eq!(
            json[0]["value"]["from"][0]["podSelector"]["matchLabels"][JOB_ID_LABEL],
            "20"
        );
        assert_eq!(json[1]["path"], "/spec/egress/-");
        assert_eq!(
            json[1]["value"]["to"][0]["podSelector"]["matchLabels"][JOB_ID_LABEL],
            "20"
        );
    }

    #[test]
    fn test_back_patch_applies_to_seeded_policy() {
        let target = FirewallBuilder::new("11", "apps").build();
        let mut doc = serde_json::to_value(&target).unwrap();
        json_patch::patch(&mut doc, &peer_back_patch("20", "11").patch).unwrap();

        let patched: NetworkPolicy = serde_json::from_value(doc).unwrap();
        assert_eq!(ingress(&patched).len(), 3);
        assert_eq!(egress(&patched).len(), 3);
    }
}

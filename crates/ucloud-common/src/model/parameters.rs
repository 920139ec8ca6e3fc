//! Parameter and resource bindings attached to a job

use serde::{Deserialize, Serialize};

/// An inclusive range of ports opened on a public IP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range
    pub start: u16,
    /// Last port in the range
    pub end: u16,
}

/// A value bound to an application parameter or attached as a resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppParameterValue {
    /// A file or folder in the virtual filesystem
    File {
        /// Virtual path, `/<driveId>/<rest>`
        path: String,
        /// Mount read-only
        #[serde(default, rename = "readOnly")]
        read_only: bool,
    },
    /// Free text
    Text {
        /// The text
        value: String,
    },
    /// Integral number
    Integer {
        /// The number
        value: i64,
    },
    /// Floating point number
    FloatingPoint {
        /// The number
        value: f64,
    },
    /// Boolean switch
    Bool {
        /// The switch
        value: bool,
    },
    /// Another job this job should be able to reach
    Peer {
        /// Hostname the peer is reachable under from this job
        hostname: String,
        /// Id of the peer job
        #[serde(rename = "jobId")]
        job_id: String,
    },
    /// A public IP bound to the job
    Network {
        /// Id of the IP resource
        id: String,
        /// The address itself, resolved by the orchestration service
        #[serde(default, rename = "ipAddress")]
        ip_address: Option<String>,
        /// Ports opened on the address
        #[serde(default, rename = "openPorts")]
        open_ports: Vec<PortRange>,
    },
    /// A public link routed to the job's web interface
    Ingress {
        /// Id of the link resource
        id: String,
    },
}

impl AppParameterValue {
    /// Returns the peer job id when this value is a peer binding
    pub fn peer_job(&self) -> Option<&str> {
        match self {
            AppParameterValue::Peer { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

//! Deterministic names for compiled objects
//!
//! The workload name is the only join key between cluster objects and jobs.
//! The compiler builds it with [`workload_name`] and the monitor recovers the
//! job with [`parse_workload_name`]; both must change together.

const PREFIX: &str = "j-";
const RANK_SEPARATOR: &str = "-job-";

/// A workload name split back into its job id and rank
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    /// Owning job
    pub job_id: String,
    /// Replica rank
    pub rank: u32,
}

/// Name of the primary workload for one replica: `j-<jobId>-job-<rank>`
pub fn workload_name(job_id: &str, rank: u32) -> String {
    format!("{PREFIX}{job_id}{RANK_SEPARATOR}{rank}")
}

/// Recover `(jobId, rank)` from a workload name
///
/// Returns `None` for anything the compiler could not have produced; unrelated
/// objects in the namespace land here.
pub fn parse_workload_name(name: &str) -> Option<WorkloadRef> {
    let rest = name.strip_prefix(PREFIX)?;
    let (job_id, rank) = rest.split_once(RANK_SEPARATOR)?;
    if job_id.is_empty() || rank.is_empty() || rank.contains(RANK_SEPARATOR) {
        return None;
    }
    if !rank.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rank = rank.parse().ok()?;
    Some(WorkloadRef {
        job_id: job_id.to_string(),
        rank,
    })
}

/// Headless service and DNS subdomain shared by all replicas: `j-<jobId>`
pub fn service_name(job_id: &str) -> String {
    format!("{PREFIX}{job_id}")
}

/// Network policy owned by rank 0: `policy-<jobId>`
pub fn firewall_name(job_id: &str) -> String {
    format!("policy-{job_id}")
}

/// Service exposing the SSH port: `j-<jobId>-ssh`
pub fn ssh_service_name(job_id: &str) -> String {
    format!("{PREFIX}{job_id}-ssh")
}

/// Service binding a public IP: `j-<jobId>-ip`
pub fn ip_service_name(job_id: &str) -> String {
    format!("{PREFIX}{job_id}-ip")
}

/// Service exposing the sync daemon: `j-<jobId>-sync`
pub fn sync_service_name(job_id: &str) -> String {
    format!("{PREFIX}{job_id}-sync")
}

/// Fully qualified DNS name of one replica
pub fn replica_fqdn(job_id: &str, rank: u32, namespace: &str) -> String {
    format!(
        "{}.{}.{namespace}.svc.cluster.local",
        workload_name(job_id, rank),
        service_name(job_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_left_inverse_of_name() {
        for job_id in ["1", "4711", "abc", "a-b-c", "job"] {
            for rank in [0, 1, 7, 128, u32::MAX] {
                let parsed = parse_workload_name(&workload_name(job_id, rank));
                assert_eq!(
                    parsed,
                    Some(WorkloadRef {
                        job_id: job_id.to_string(),
                        rank
                    }),
                    "{job_id}/{rank}"
                );
            }
        }
    }

    #[test]
    fn test_malformed_names_do_not_parse() {
        let malformed = [
            "",
            "j-",
            "j-1",
            "j-1-job-",
            "j--job-0",
            "x-1-job-0",
            "j-1-job-abc",
            "j-1-job--1",
            "j-1-job-+1",
            "j-1-job-0-job-1",
            "j-1-job-99999999999",
            "coredns-5d78c9869d-abcde",
            "policy-1",
        ];
        for name in malformed {
            assert_eq!(parse_workload_name(name), None, "{name}");
        }
    }

    #[test]
    fn test_supporting_object_names() {
        assert_eq!(service_name("42"), "j-42");
        assert_eq!(firewall_name("42"), "policy-42");
        assert_eq!(ssh_service_name("42"), "j-42-ssh");
        assert_eq!(ip_service_name("42"), "j-42-ip");
        assert_eq!(sync_service_name("42"), "j-42-sync");
    }

    #[test]
    fn test_replica_fqdn_uses_per_job_subdomain() {
        assert_eq!(
            replica_fqdn("42", 1, "ucloud-apps"),
            "j-42-job-1.j-42.ucloud-apps.svc.cluster.local"
        );
    }

    #[test]
    fn test_supporting_objects_never_parse_as_workloads() {
        assert_eq!(parse_workload_name(&service_name("42")), None);
        assert_eq!(parse_workload_name(&ssh_service_name("42")), None);
        assert_eq!(parse_workload_name(&ip_service_name("42")), None);
        assert_eq!(parse_workload_name(&sync_service_name("42")), None);
    }
}

//! Multi-node discovery files
//!
//! An init container writes the replica count, every replica's DNS name and
//! the executing replica's rank into an `emptyDir` shared with the user
//! container at `/etc/ucloud`. Replicas find each other through these files.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, Pod, Volume, VolumeMount,
};

use ucloud_common::naming::replica_fqdn;

use crate::resources::auxiliary_requirements;

/// Name of the init container
pub const COORDINATOR_CONTAINER: &str = "ucloud-compat";

/// Volume holding the discovery files
pub const ETC_VOLUME: &str = "ucloud-etc";

/// Mount point of the discovery files
pub const ETC_DIR: &str = "/etc/ucloud";

/// Keys the SSH daemon accepts, written next to the discovery files
pub const AUTHORIZED_KEYS: &str = "/etc/ucloud/ssh/authorized_keys";

/// Variable carrying the authorized keys into the init container
pub const SSH_KEYS_ENV: &str = "UCLOUD_SSH_KEYS";

/// The discovery script for `rank` of a job with `replicas` replicas
pub fn coordinator_script(job_id: &str, replicas: u32, rank: u32, namespace: &str) -> String {
    let mut script = String::new();
    script.push_str(&format!("echo '{replicas}' > {ETC_DIR}/number_of_nodes.txt\n"));
    for r in 0..replicas {
        let host = replica_fqdn(job_id, r, namespace);
        script.push_str(&format!("echo '{host}' > {ETC_DIR}/node-{r}.txt\n"));
        script.push_str(&format!("echo '{host}' >> {ETC_DIR}/nodes.txt\n"));
    }
    script.push_str(&format!("echo {rank} > {ETC_DIR}/rank.txt\n"));
    script
}

/// The init container running [`coordinator_script`]
pub fn coordinator_container(
    job_id: &str,
    replicas: u32,
    rank: u32,
    namespace: &str,
    image: &str,
) -> Container {
    Container {
        name: COORDINATOR_CONTAINER.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            coordinator_script(job_id, replicas, rank, namespace),
        ]),
        resources: Some(auxiliary_requirements()),
        volume_mounts: Some(vec![etc_mount()]),
        ..Default::default()
    }
}

/// The shared discovery volume
pub fn etc_volume() -> Volume {
    Volume {
        name: ETC_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Mount of the discovery volume, used by both the init and the user container
pub fn etc_mount() -> VolumeMount {
    VolumeMount {
        name: ETC_VOLUME.to_string(),
        mount_path: ETC_DIR.to_string(),
        ..Default::default()
    }
}

/// Have the init container of `pod` write `keys` to [`AUTHORIZED_KEYS`]
pub fn inject_ssh_keys(pod: &mut Pod, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    let Some(init) = pod
        .spec
        .as_mut()
        .and_then(|s| s.init_containers.as_mut())
        .and_then(|c| c.iter_mut().find(|c| c.name == COORDINATOR_CONTAINER))
    else {
        return;
    };

    init.env.get_or_insert_with(Vec::new).push(EnvVar {
        name: SSH_KEYS_ENV.to_string(),
        value: Some(keys.join("\n")),
        ..Default::default()
    });
    if let Some(script) = init.command.as_mut().and_then(|c| c.last_mut()) {
        script.push_str(&format!("mkdir -p {ETC_DIR}/ssh\n"));
        script.push_str(&format!(
            "printf '%s\\n' \"${{{SSH_KEYS_ENV}}}\" > {AUTHORIZED_KEYS}\n"
        ));
    }
}

//! File parameters to container mounts
//!
//! Every file parameter becomes a sub-path mount of the shared filesystem
//! volume under `/work`. Identical virtual paths are merged. Different paths
//! with the same folder name get numeric suffixes, assigned in sorted path
//! order so the result does not depend on parameter order.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::VolumeMount;

use ucloud_common::collaborators::PathResolver;

use crate::CompilationError;

/// Volume name of the shared filesystem
pub const FILESYSTEM_VOLUME: &str = "ucloud-filesystem";

/// Mount point of the job folder inside the container
pub const WORK_DIR: &str = "/work";

/// A mount the user asked for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountRequest {
    /// Virtual path, `/<driveId>/<rest>`
    pub path: String,
    /// Mount read-only
    pub read_only: bool,
}

/// A resolved mount
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMount {
    /// Virtual path the user asked for
    pub virtual_path: String,
    /// Path inside the shared filesystem volume
    pub sub_path: String,
    /// Path inside the container
    pub container_path: String,
    /// Mount read-only
    pub read_only: bool,
}

impl ResolvedMount {
    /// As a container volume mount
    pub fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: FILESYSTEM_VOLUME.to_string(),
            mount_path: self.container_path.clone(),
            sub_path: Some(self.sub_path.clone()),
            read_only: Some(self.read_only),
            ..Default::default()
        }
    }
}

/// Resolved mounts keyed by virtual path
#[derive(Clone, Debug, Default)]
pub struct MountTable {
    mounts: BTreeMap<String, ResolvedMount>,
}

impl MountTable {
    /// Container path a virtual path was mounted at
    pub fn container_path(&self, virtual_path: &str) -> Option<&str> {
        self.mounts
            .get(virtual_path)
            .map(|m| m.container_path.as_str())
    }

    /// All mounts in sorted virtual-path order
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedMount> {
        self.mounts.values()
    }

    /// Number of mounts
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether there are no mounts
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

fn drive_of(path: &str) -> Option<&str> {
    path.strip_prefix('/')?
        .split('/')
        .next()
        .filter(|d| !d.is_empty())
}

fn folder_name(path: &str, drive: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && *s != drive)
        .map(str::to_string)
        .unwrap_or_else(|| format!("drive-{drive}"))
}

/// Strip the leading slash so the path works as a volume `subPath`
pub fn sub_path_of(internal: &str) -> String {
    internal.trim_start_matches('/').to_string()
}

/// Resolve mount requests for a job
///
/// Read-write wins when the same path is requested twice with different modes.
pub fn resolve_mounts(
    job_id: &str,
    requests: &[MountRequest],
    resolver: &dyn PathResolver,
) -> Result<MountTable, CompilationError> {
    let mut merged: BTreeMap<&str, bool> = BTreeMap::new();
    for req in requests {
        merged
            .entry(req.path.as_str())
            .and_modify(|ro| *ro = *ro && req.read_only)
            .or_insert(req.read_only);
    }

    let mut taken: HashSet<String> = HashSet::new();
    let mut mounts = BTreeMap::new();
    for (path, read_only) in merged {
        let drive = drive_of(path).ok_or_else(|| CompilationError::UnknownDrive {
            job: job_id.to_string(),
            path: path.to_string(),
        })?;
        let internal =
            resolver
                .virtual_to_internal(path)
                .ok_or_else(|| CompilationError::UnknownMount {
                    job: job_id.to_string(),
                    path: path.to_string(),
                })?;

        let base = folder_name(path, drive);
        let mut name = base.clone();
        let mut suffix = 0;
        while !taken.insert(name.clone()) {
            suffix += 1;
            name = format!("{base}-{suffix}");
        }

        mounts.insert(
            path.to_string(),
            ResolvedMount {
                virtual_path: path.to_string(),
                sub_path: sub_path_of(&internal),
                container_path: format!("{WORK_DIR}/{name}"),
                read_only,
            },
        );
    }

    Ok(MountTable { mounts })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Resolver mapping `/<drive>/<rest>` to `/storage/<drive>/<rest>` for known drives
    pub struct StaticResolver {
        pub drives: Vec<&'static str>,
    }

    impl PathResolver for StaticResolver {
        fn virtual_to_internal(&self, path: &str) -> Option<String> {
            let drive = drive_of(path)?;
            self.drives
                .contains(&drive)
                .then(|| format!("/storage{path}"))
        }

        fn internal_to_virtual(&self, drive: &str, path: &str) -> Option<String> {
            path.strip_prefix("/storage")
                .filter(|p| p.starts_with(&format!("/{drive}")))
                .map(str::to_string)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StaticResolver;
    use super::*;

    fn req(path: &str, read_only: bool) -> MountRequest {
        MountRequest {
            path: path.to_string(),
            read_only,
        }
    }

    fn resolver() -> StaticResolver {
        StaticResolver {
            drives: vec!["1", "2", "3"],
        }
    }

    fn paths(table: &MountTable) -> Vec<(String, String)> {
        table
            .iter()
            .map(|m| (m.virtual_path.clone(), m.container_path.clone()))
            .collect()
    }

    #[test]
    fn test_mounts_land_under_work() {
        let table = resolve_mounts("9", &[req("/1/home/data", true)], &resolver()).unwrap();
        let m = table.iter().next().unwrap();
        assert_eq!(m.container_path, "/work/data");
        assert_eq!(m.sub_path, "storage/1/home/data");
        assert!(m.read_only);
        assert_eq!(table.container_path("/1/home/data"), Some("/work/data"));
    }

    #[test]
    fn test_collisions_are_suffixed_in_sorted_order() {
        let forward = [
            req("/3/data", false),
            req("/1/data", false),
            req("/2/x/data", true),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let a = resolve_mounts("9", &forward, &resolver()).unwrap();
        let b = resolve_mounts("9", &backward, &resolver()).unwrap();
        assert_eq!(paths(&a), paths(&b));
        assert_eq!(
            paths(&a),
            vec![
                ("/1/data".to_string(), "/work/data".to_string()),
                ("/2/x/data".to_string(), "/work/data-1".to_string()),
                ("/3/data".to_string(), "/work/data-2".to_string()),
            ]
        );
    }

    #[test]
    fn test_suffix_skips_names_already_taken() {
        let table = resolve_mounts(
            "9",
            &[req("/1/a/data", false), req("/1/b/data", false), req("/1/data-1", false)],
            &resolver(),
        )
        .unwrap();
        let mut got: Vec<_> = table.iter().map(|m| m.container_path.clone()).collect();
        got.sort();
        assert_eq!(got, vec!["/work/data", "/work/data-1", "/work/data-1-1"]);
    }

    #[test]
    fn test_duplicate_paths_merge_and_writable_wins() {
        let table = resolve_mounts(
            "9",
            &[req("/1/data", true), req("/1/data", false)],
            &resolver(),
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(!table.iter().next().unwrap().read_only);
    }

    #[test]
    fn test_drive_root_gets_a_drive_name() {
        let table = resolve_mounts("9", &[req("/2", false)], &resolver()).unwrap();
        assert_eq!(table.container_path("/2"), Some("/work/drive-2"));
    }

    #[test]
    fn test_unknown_drive_and_mount_abort() {
        let err = resolve_mounts("9", &[req("relative/path", false)], &resolver()).unwrap_err();
        assert!(matches!(err, CompilationError::UnknownDrive { .. }));

        let err = resolve_mounts("9", &[req("/77/data", false)], &resolver()).unwrap_err();
        assert!(matches!(err, CompilationError::UnknownMount { .. }));
        assert!(err.is_configuration());
    }
}

//! Drive-table path resolution
//!
//! Virtual paths are `/<driveId>/<rest>`. Each known drive maps to a
//! directory relative to the shared file system root.

use std::collections::BTreeMap;

use ucloud_common::collaborators::PathResolver;

/// Resolver over a fixed drive table
#[derive(Clone, Debug, Default)]
pub struct DriveTable {
    drives: BTreeMap<String, String>,
}

impl DriveTable {
    /// Build from `(drive id, internal directory)` pairs
    pub fn new(drives: impl IntoIterator<Item = (String, String)>) -> Self {
        let drives = drives
            .into_iter()
            .map(|(id, dir)| (id, normalize(&dir)))
            .collect();
        Self { drives }
    }

    /// Parse a `DRIVE=DIR` command line entry
    pub fn parse_entry(raw: &str) -> Result<(String, String), String> {
        let (id, dir) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected DRIVE=DIR, got {raw:?}"))?;
        if id.is_empty() || id.contains('/') {
            return Err(format!("invalid drive id {id:?}"));
        }
        Ok((id.to_string(), dir.to_string()))
    }
}

fn normalize(dir: &str) -> String {
    format!("/{}", dir.trim_matches('/'))
}

impl PathResolver for DriveTable {
    fn virtual_to_internal(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix('/')?;
        let (drive, tail) = rest.split_once('/').unwrap_or((rest, ""));
        let base = self.drives.get(drive)?;
        if tail.is_empty() {
            Some(base.clone())
        } else {
            Some(format!("{}/{tail}", base.trim_end_matches('/')))
        }
    }

    fn internal_to_virtual(&self, drive: &str, path: &str) -> Option<String> {
        let base = self.drives.get(drive)?;
        let tail = path.strip_prefix(base.trim_end_matches('/'))?;
        if !tail.is_empty() && !tail.starts_with('/') {
            return None;
        }
        Some(format!("/{drive}{tail}"))
    }
}

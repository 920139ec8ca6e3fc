//! Stored integrated application configuration

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A folder shared through the sync daemon
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncthingFolder {
    /// Virtual path of the folder
    pub ucloud_path: String,
}

/// A remote device the sync daemon talks to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncthingDevice {
    /// Device id as shown by the remote daemon
    pub device_id: String,
    /// Human readable label
    #[serde(default)]
    pub label: String,
}

/// Sync daemon settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncthingSettings {
    /// Folders to synchronize
    #[serde(default)]
    pub folders: Vec<SyncthingFolder>,
    /// Devices allowed to synchronize
    #[serde(default)]
    pub devices: Vec<SyncthingDevice>,
}

/// Interactive terminal settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Virtual path of the folder the terminal opens in
    pub folder: String,
}

/// Settings of one integrated application, discriminated by `type`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IAppSettings {
    /// Sync daemon
    Syncthing(SyncthingSettings),
    /// Interactive terminal
    Terminal(TerminalSettings),
}

impl IAppSettings {
    /// Name of the application these settings belong to
    pub fn app_name(&self) -> &'static str {
        match self {
            IAppSettings::Syncthing(_) => crate::syncthing::APP_NAME,
            IAppSettings::Terminal(_) => crate::terminal::APP_NAME,
        }
    }
}

/// Configuration of the integrated application attached to a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IAppConfig {
    /// Owning job
    pub job_id: String,
    /// Application name
    pub app_name: String,
    /// Application settings
    pub settings: IAppSettings,
    /// Version tag, replaced on every update
    pub etag: String,
}

/// A fresh random version tag of 16 hex characters
pub fn new_etag() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_shape() {
        let a = new_etag();
        let b = new_etag();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_settings_are_tagged() {
        let raw = r#"{
            "type": "syncthing",
            "folders": [{"ucloudPath": "/1/sync"}],
            "devices": [{"deviceId": "ABC-DEF", "label": "laptop"}]
        }"#;
        let settings: IAppSettings = serde_json::from_str(raw).unwrap();
        let IAppSettings::Syncthing(s) = &settings else {
            panic!("expected syncthing settings");
        };
        assert_eq!(s.folders[0].ucloud_path, "/1/sync");
        assert_eq!(s.devices[0].device_id, "ABC-DEF");
        assert_eq!(settings.app_name(), "syncthing");

        let terminal: IAppSettings =
            serde_json::from_str(r#"{"type": "terminal", "folder": "/1/home"}"#).unwrap();
        assert_eq!(terminal.app_name(), "terminal");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<IAppSettings>(r#"{"type": "jupyter"}"#).is_err());
    }
}

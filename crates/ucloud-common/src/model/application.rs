//! Resolved application descriptions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name and version of an application
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAndVersion {
    /// Application name
    pub name: String,
    /// Application version
    pub version: String,
}

/// How an application is interacted with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationType {
    /// Runs to completion without interaction
    #[default]
    Batch,
    /// Exposes a web interface on `web_port`
    Web,
    /// Exposes a VNC server on `vnc_port`
    Vnc,
}

/// Whether the application supports SSH access
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SshMode {
    /// SSH is never available
    #[default]
    Disabled,
    /// The user may opt in
    Optional,
    /// SSH is always enabled
    Mandatory,
}

/// Container behaviour requested by the tool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDescription {
    /// Start in `/work` instead of the image's working directory
    #[serde(default)]
    pub change_working_directory: bool,
    /// Run the container as root
    #[serde(default)]
    pub run_as_root: bool,
}

/// The container image an application runs in
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Fully qualified image reference
    pub image: String,
    /// Container behaviour
    #[serde(default)]
    pub container: ContainerDescription,
}

/// One fragment of an application's command line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvocationParameter {
    /// A literal word
    Word {
        /// The word
        word: String,
    },
    /// The value of a parameter, omitted entirely when the parameter is unset
    Var {
        /// Parameter name
        variable: String,
        /// Prepended to the rendered value inside the same argument
        #[serde(default)]
        prefix: String,
        /// Appended to the rendered value inside the same argument
        #[serde(default)]
        suffix: String,
    },
    /// A flag emitted only when a boolean parameter is true
    Flag {
        /// Parameter name
        variable: String,
        /// Flag to emit
        flag: String,
    },
    /// An environment variable expanded by the shell at runtime
    Env {
        /// Environment variable name
        variable: String,
    },
}

/// How an application is started
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInvocation {
    /// Image and container behaviour
    pub tool: Tool,
    /// Command line, rendered into the generated start script
    #[serde(default)]
    pub invocation: Vec<InvocationParameter>,
    /// Extra environment, rendered with the same rules as the command line
    #[serde(default)]
    pub environment: BTreeMap<String, InvocationParameter>,
    /// Interaction model
    #[serde(default)]
    pub application_type: ApplicationType,
    /// Port of the web interface for web applications
    #[serde(default)]
    pub web_port: Option<u16>,
    /// Port of the VNC server for VNC applications
    #[serde(default)]
    pub vnc_port: Option<u16>,
    /// SSH support
    #[serde(default)]
    pub ssh: SshMode,
    /// Applications marked multi-node may be started with more than one replica
    #[serde(default)]
    pub allow_multi_node: bool,
}

/// A fully resolved application
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Identity
    pub metadata: NameAndVersion,
    /// Start instructions
    pub invocation: ApplicationInvocation,
}

//! Guest boot configuration: the daemon config and the cloud-init user data
//! that drops it into the VM.

use serde::Serialize;

use super::error::SandboxError;
use super::podnetwork::PodNetworkConfig;

/// Read by the in-guest daemon at boot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    pub pod_network: PodNetworkConfig,
    pub pod_namespace: String,
    pub pod_name: String,
}

impl DaemonConfig {
    /// Pretty JSON with four-space indentation.
    pub fn to_json(&self) -> Result<String, SandboxError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| SandboxError::Serde(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloudConfig {
    #[serde(rename = "write_files", skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<WriteFile>,
}

impl CloudConfig {
    /// Render as `#cloud-config` user data.
    pub fn generate(&self) -> Result<String, SandboxError> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("#cloud-config\n{body}"))
    }
}

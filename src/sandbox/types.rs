use std::collections::BTreeMap;
use std::fmt;

// ── Sandbox identity ────────────────────────────────────────────────

pub type SandboxId = String;
pub type InstanceId = String;

/// CRI annotation carrying the pod name.
pub const SANDBOX_NAME_ANNOTATION: &str = "io.kubernetes.cri.sandbox-name";
/// CRI annotation carrying the pod namespace.
pub const SANDBOX_NAMESPACE_ANNOTATION: &str = "io.kubernetes.cri.sandbox-namespace";

/// File name of the agent socket inside each pod directory.
pub const AGENT_SOCKET_NAME: &str = "agent.ttrpc";
/// File name of the daemon config copy kept in each pod directory.
pub const DAEMON_CONFIG_FILE: &str = "daemon.json";
/// Where cloud-init writes the daemon config inside the guest.
pub const GUEST_DAEMON_CONFIG_PATH: &str = "/peerpod/daemon.json";
/// Path of the agent endpoint served by the in-guest daemon.
pub const AGENT_URL_PATH: &str = "/agent";

// ── Backend kind ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudBackendKind {
    OpenStack,
    PowerVc,
    PowerVs,
}

impl CloudBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudBackendKind::OpenStack => "openstack",
            CloudBackendKind::PowerVc => "powervc",
            CloudBackendKind::PowerVs => "powervs",
        }
    }
}

impl fmt::Display for CloudBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Instance status (output of get_instance) ────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Active,
    Error,
    Other(String),
}

impl InstanceState {
    /// Map a backend status string. Both Nova and PowerVS report upper-case
    /// `ACTIVE` / `ERROR`; everything else is treated as transient.
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "ACTIVE" => InstanceState::Active,
            "ERROR" => InstanceState::Error,
            "BUILD" | "PENDING" => InstanceState::Pending,
            _ => InstanceState::Other(status.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKind {
    Fixed,
    Floating,
    Other(String),
}

impl AddressKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "fixed" => AddressKind::Fixed,
            "floating" => AddressKind::Floating,
            other => AddressKind::Other(other.to_string()),
        }
    }
}

/// One address on one network attachment, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    pub addr: String,
    pub version: u8,
    pub kind: AddressKind,
}

/// Network name → addresses, in the order the backend enumerated them.
pub type NetworkAttachments = BTreeMap<String, Vec<AddressEntry>>;

#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
    pub attachments: NetworkAttachments,
}

/// Returned by `create_instance` as soon as the backend accepts the request.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,
}

// ── Instance spec (input to create_instance) ────────────────────────

#[derive(Debug, Clone)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub image_ref: String,
    pub size_ref: String,
    pub network_ref: String,
    pub placement_ref: Option<String>,
    pub ssh_key_ref: Option<String>,
    pub user_data: String,
    /// Free-form tags for backends that can store them (Nova metadata).
    pub labels: BTreeMap<String, String>,
}

// ── Provider config ─────────────────────────────────────────────────

/// Static per-backend configuration shared by every adapter.
#[derive(Clone, Default)]
pub struct ProviderConfig {
    pub network_id: String,
    pub image_id: String,
    pub flavor_id: String,
    pub ssh_key: Option<String>,
    pub host_group: Option<String>,
    pub openstack: OpenStackEndpoints,
    pub powervs: PowerVsSettings,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("network_id", &self.network_id)
            .field("image_id", &self.image_id)
            .field("flavor_id", &self.flavor_id)
            .field("ssh_key", &self.ssh_key)
            .field("host_group", &self.host_group)
            .field("openstack", &self.openstack)
            .field("powervs", &self.powervs)
            .finish()
    }
}

/// Nova / Neutron endpoints. Token acquisition happens outside this process.
#[derive(Clone, Default)]
pub struct OpenStackEndpoints {
    pub compute_url: String,
    pub network_url: String,
    pub auth_token: String,
}

impl fmt::Debug for OpenStackEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStackEndpoints")
            .field("compute_url", &self.compute_url)
            .field("network_url", &self.network_url)
            .field("auth_token", &redacted(&self.auth_token))
            .finish()
    }
}

#[derive(Clone)]
pub struct PowerVsSettings {
    pub api_url: String,
    pub cloud_instance_id: String,
    pub crn: Option<String>,
    pub bearer_token: String,
    pub memory_gb: f64,
    pub processors: f64,
    pub proc_type: String,
    pub sys_type: String,
}

impl Default for PowerVsSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            cloud_instance_id: String::new(),
            crn: None,
            bearer_token: String::new(),
            memory_gb: 4.0,
            processors: 0.25,
            proc_type: "shared".into(),
            sys_type: "s922".into(),
        }
    }
}

impl fmt::Debug for PowerVsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerVsSettings")
            .field("api_url", &self.api_url)
            .field("cloud_instance_id", &self.cloud_instance_id)
            .field("crn", &self.crn)
            .field("bearer_token", &redacted(&self.bearer_token))
            .field("memory_gb", &self.memory_gb)
            .field("processors", &self.processors)
            .field("proc_type", &self.proc_type)
            .field("sys_type", &self.sys_type)
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "**REDACTED**" }
}

// ── Tests ───────────────────────────────────────────────────────────

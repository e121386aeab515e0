use std::io;

/// Errors from sandbox lifecycle operations.
///
/// Cloud adapters, the worker node and the agent proxy map their internal
/// failures into these variants. `PartialFailure` is only produced by
/// `StopVM`, after the sandbox record has already been removed.
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("sandbox {0} already exists")]
    AlreadyExists(String),

    #[error("sandbox {0} does not exist")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("instance {0} entered error state")]
    State(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("pod network: {0}")]
    NetworkSetup(String),

    #[error("agent proxy: {0}")]
    Proxy(String),

    #[error("teardown incomplete: {}", .0.join("; "))]
    PartialFailure(Vec<String>),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("serialization: {0}")]
    Serde(String),

    #[error("configuration: {0}")]
    Config(String),

    #[error("unknown cloud backend: {0}")]
    UnknownBackend(String),
}

impl SandboxError {
    /// Stable machine-readable name, returned to RPC callers next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::InvalidArgument(_) => "invalid_argument",
            SandboxError::AlreadyExists(_) => "already_exists",
            SandboxError::NotFound(_) => "not_found",
            SandboxError::Provider(_) => "provider",
            SandboxError::State(_) => "state",
            SandboxError::Timeout(_) => "timeout",
            SandboxError::Cancelled => "cancelled",
            SandboxError::NetworkSetup(_) => "network_setup",
            SandboxError::Proxy(_) => "proxy",
            SandboxError::PartialFailure(_) => "partial_failure",
            SandboxError::Io(_) => "io",
            SandboxError::Serde(_) => "serialization",
            SandboxError::Config(_) => "config",
            SandboxError::UnknownBackend(_) => "unknown_backend",
        }
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::Serde(e.to_string())
    }
}

impl From<serde_yaml::Error> for SandboxError {
    fn from(e: serde_yaml::Error) -> Self {
        SandboxError::Serde(e.to_string())
    }
}

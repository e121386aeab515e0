use async_trait::async_trait;

use super::error::SandboxError;
use super::types::{CloudBackendKind, CreateInstanceRequest, InstanceHandle, InstanceStatus};

/// Adapter for one cloud / virtualization backend.
///
/// One provider instance is chosen at process construction and shared by
/// every lifecycle call. Implementations must be safe to call concurrently.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> CloudBackendKind;

    /// Longest instance name the backend accepts.
    fn max_instance_name_len(&self) -> usize;

    /// Validate the backend-required configuration. Called once, before the
    /// provider serves any request.
    fn config_verifier(&self) -> Result<(), SandboxError>;

    /// Request a new instance. Returns as soon as the backend accepts it;
    /// the instance is usually still pending.
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<InstanceHandle, SandboxError>;

    async fn get_instance(&self, id: &str) -> Result<InstanceStatus, SandboxError>;

    /// Best effort. Deleting an already-deleted instance may fail.
    async fn delete_instance(&self, id: &str) -> Result<(), SandboxError>;

    /// Resolve a network identifier to its name. Exactly one network must match.
    async fn resolve_network_name(&self, network_id: &str) -> Result<String, SandboxError>;
}

//! Contract with the node-side pod network tunnel manager.
//!
//! The orchestrator never looks inside [`PodNetworkConfig`]; it takes what
//! `inspect` returns, writes it into the daemon config for the guest and
//! hands it back to `setup` / `teardown`.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::SandboxError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodNetworkConfig(pub serde_json::Value);

#[async_trait]
pub trait WorkerNode: Send + Sync {
    async fn inspect(&self, netns_path: &str) -> Result<PodNetworkConfig, SandboxError>;

    async fn setup(
        &self,
        netns_path: &str,
        pod_node_ips: &[Ipv4Addr],
        config: &PodNetworkConfig,
    ) -> Result<(), SandboxError>;

    async fn teardown(&self, netns_path: &str, config: &PodNetworkConfig)
    -> Result<(), SandboxError>;
}

/// Worker node for clusters whose tunnels are programmed by something else
/// (a CNI plugin or a separate daemon). Records the netns in the config and
/// otherwise only logs.
#[derive(Debug, Default)]
pub struct PassthroughWorkerNode;

#[async_trait]
impl WorkerNode for PassthroughWorkerNode {
    async fn inspect(&self, netns_path: &str) -> Result<PodNetworkConfig, SandboxError> {
        if netns_path.is_empty() {
            return Err(SandboxError::NetworkSetup(
                "empty network namespace path".into(),
            ));
        }
        Ok(PodNetworkConfig(json!({ "netns": netns_path })))
    }

    async fn setup(
        &self,
        netns_path: &str,
        pod_node_ips: &[Ipv4Addr],
        _config: &PodNetworkConfig,
    ) -> Result<(), SandboxError> {
        tracing::info!(
            netns = %netns_path,
            ips = ?pod_node_ips,
            "pod network tunnel left to external manager"
        );
        Ok(())
    }

    async fn teardown(
        &self,
        netns_path: &str,
        _config: &PodNetworkConfig,
    ) -> Result<(), SandboxError> {
        tracing::info!(netns = %netns_path, "pod network teardown left to external manager");
        Ok(())
    }
}

//! PowerVC backend. PowerVC exposes the Nova API but takes the SSH key as a
//! public key injected into `authorized_keys` rather than a key-pair name.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::nova::{NetworkRef, NovaClient, PersonalityFile, ServerCreate};
use super::require;
use crate::sandbox::error::SandboxError;
use crate::sandbox::provider::CloudProvider;
use crate::sandbox::types::*;

const MAX_INSTANCE_NAME_LEN: usize = 45;
const AUTHORIZED_KEYS_PATH: &str = "/root/.ssh/authorized_keys";

pub struct PowerVcProvider {
    client: NovaClient,
    config: ProviderConfig,
}

impl PowerVcProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, SandboxError> {
        tracing::info!(config = ?config, "powervc provider config");
        Ok(Self {
            client: NovaClient::new(&config.openstack),
            config,
        })
    }
}

#[async_trait]
impl CloudProvider for PowerVcProvider {
    fn kind(&self) -> CloudBackendKind {
        CloudBackendKind::PowerVc
    }

    fn max_instance_name_len(&self) -> usize {
        MAX_INSTANCE_NAME_LEN
    }

    fn config_verifier(&self) -> Result<(), SandboxError> {
        require("image ID", &self.config.image_id)?;
        require("network ID", &self.config.network_id)?;
        require("flavor ID", &self.config.flavor_id)?;
        require("compute endpoint", &self.config.openstack.compute_url)?;
        require("network endpoint", &self.config.openstack.network_url)
    }

    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<InstanceHandle, SandboxError> {
        let personality = req
            .ssh_key_ref
            .iter()
            .map(|key| PersonalityFile {
                path: AUTHORIZED_KEYS_PATH.into(),
                contents: STANDARD.encode(key),
            })
            .collect();

        let body = ServerCreate {
            name: req.name.clone(),
            image_ref: req.image_ref,
            flavor_ref: req.size_ref,
            networks: vec![NetworkRef {
                uuid: req.network_ref,
            }],
            key_name: None,
            availability_zone: req.placement_ref,
            user_data: STANDARD.encode(req.user_data),
            metadata: req.labels,
            personality,
        };

        let server = self.client.create_server(&body).await?;
        tracing::info!(instance_id = %server.id, name = %req.name, "powervc accepted server");
        Ok(InstanceHandle {
            id: server.id,
            name: req.name,
            state: InstanceState::Pending,
        })
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceStatus, SandboxError> {
        Ok(self.client.get_server(id).await?.into_status())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), SandboxError> {
        self.client.delete_server(id).await
    }

    async fn resolve_network_name(&self, network_id: &str) -> Result<String, SandboxError> {
        self.client.network_name(network_id).await
    }
}

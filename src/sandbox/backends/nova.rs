//! HTTP client for the Nova compute and Neutron network APIs.
//!
//! Shared by the OpenStack and PowerVC backends. Authentication is a
//! pre-issued token sent as `X-Auth-Token`.
//!
//! API: POST /servers, GET /servers/{id}, DELETE /servers/{id},
//! GET /v2.0/networks?id={id}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sandbox::error::SandboxError;
use crate::sandbox::types::{
    AddressEntry, AddressKind, InstanceState, InstanceStatus, NetworkAttachments,
    OpenStackEndpoints,
};

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ServerCreate {
    pub name: String,
    #[serde(rename = "imageRef")]
    pub image_ref: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    pub networks: Vec<NetworkRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Base64-encoded.
    pub user_data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub personality: Vec<PersonalityFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkRef {
    pub uuid: String,
}

/// File injected into the guest at boot. `contents` is base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct PersonalityFile {
    pub path: String,
    pub contents: String,
}

#[derive(Serialize)]
struct CreateEnvelope<'a> {
    server: &'a ServerCreate,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: Server,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<NovaAddress>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NovaAddress {
    pub addr: String,
    pub version: u8,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub kind: Option<String>,
}

impl Server {
    pub fn into_status(self) -> InstanceStatus {
        let attachments: NetworkAttachments = self
            .addresses
            .into_iter()
            .map(|(network, addrs)| {
                let entries = addrs
                    .into_iter()
                    .map(|a| AddressEntry {
                        addr: a.addr,
                        version: a.version,
                        kind: AddressKind::from_type(a.kind.as_deref().unwrap_or_default()),
                    })
                    .collect();
                (network, entries)
            })
            .collect();

        InstanceStatus {
            state: if self.status.is_empty() {
                InstanceState::Pending
            } else {
                InstanceState::from_status(&self.status)
            },
            id: self.id,
            name: self.name,
            attachments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkList {
    networks: Vec<Network>,
}

#[derive(Debug, Deserialize)]
struct Network {
    #[allow(dead_code)]
    id: String,
    name: String,
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NovaClient {
    compute_url: String,
    network_url: String,
    token: String,
    client: reqwest::Client,
}

impl NovaClient {
    pub fn new(endpoints: &OpenStackEndpoints) -> Self {
        Self {
            compute_url: endpoints.compute_url.trim_end_matches('/').to_string(),
            network_url: endpoints.network_url.trim_end_matches('/').to_string(),
            token: endpoints.auth_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a server. Nova answers 202 with only the ID filled in.
    pub async fn create_server(&self, body: &ServerCreate) -> Result<Server, SandboxError> {
        let url = format!("{}/servers", self.compute_url);
        let resp = self
            .client
            .post(&url)
            .header("X-Auth-Token", &self.token)
            .json(&CreateEnvelope { server: body })
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("nova create failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "nova create returned {status}: {body}"
            )));
        }

        let created = resp
            .json::<ServerEnvelope>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse server response: {e}")))?;
        Ok(created.server)
    }

    pub async fn get_server(&self, id: &str) -> Result<Server, SandboxError> {
        let url = format!("{}/servers/{}", self.compute_url, id);
        let resp = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("nova get failed: {e}")))?;

        if resp.status().as_u16() == 404 {
            return Err(SandboxError::Provider(format!("server {id} not found")));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "nova get returned {status}: {body}"
            )));
        }

        resp.json::<ServerEnvelope>()
            .await
            .map(|env| env.server)
            .map_err(|e| SandboxError::Serde(format!("failed to parse server response: {e}")))
    }

    pub async fn delete_server(&self, id: &str) -> Result<(), SandboxError> {
        let url = format!("{}/servers/{}", self.compute_url, id);
        let resp = self
            .client
            .delete(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("nova delete failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "nova delete returned {status}: {body}"
            )));
        }
        Ok(())
    }

    /// Name of the Neutron network with this ID. Zero or several matches is
    /// an error.
    pub async fn network_name(&self, id: &str) -> Result<String, SandboxError> {
        let url = format!("{}/v2.0/networks", self.network_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("id", id)])
            .header("X-Auth-Token", &self.token)
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("neutron list failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "neutron list returned {status}: {body}"
            )));
        }

        let list = resp
            .json::<NetworkList>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse network list: {e}")))?;

        match list.networks.as_slice() {
            [only] => Ok(only.name.clone()),
            [] => Err(SandboxError::Provider(format!("network {id} not found"))),
            many => Err(SandboxError::Provider(format!(
                "network ID {id} is ambiguous: {} networks match",
                many.len()
            ))),
        }
    }
}

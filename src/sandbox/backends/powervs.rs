//! IBM Power Virtual Server backend.
//!
//! API (under `/pcloud/v1/cloud-instances/{cloud_instance_id}`):
//! POST /pvm-instances, GET /pvm-instances/{id}, DELETE /pvm-instances/{id},
//! GET /networks/{id}

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::require;
use crate::sandbox::error::SandboxError;
use crate::sandbox::provider::CloudProvider;
use crate::sandbox::types::*;

const MAX_INSTANCE_NAME_LEN: usize = 47;

// ── Request / Response types ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PvmInstanceCreate {
    pub server_name: String,
    #[serde(rename = "imageID")]
    pub image_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pair_name: Option<String>,
    pub networks: Vec<PvmNetworkRef>,
    pub memory: f64,
    pub processors: f64,
    pub proc_type: String,
    pub sys_type: String,
    /// Base64-encoded.
    pub user_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PvmNetworkRef {
    #[serde(rename = "networkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvmInstance {
    #[serde(rename = "pvmInstanceID")]
    pub pvm_instance_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub networks: Vec<PvmNetwork>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvmNetwork {
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub network_name: String,
    #[serde(rename = "networkID", default)]
    pub network_id: String,
}

#[derive(Debug, Deserialize)]
struct PvmNetworkInfo {
    name: String,
}

impl PvmInstance {
    /// PowerVS reports one private address per attached network; treat each
    /// as the fixed address of that attachment.
    fn into_status(self) -> InstanceStatus {
        let mut attachments = NetworkAttachments::new();
        for nic in self.networks {
            if nic.ip_address.is_empty() {
                continue;
            }
            let version = if nic.ip_address.contains(':') { 6 } else { 4 };
            attachments
                .entry(nic.network_name)
                .or_default()
                .push(AddressEntry {
                    addr: nic.ip_address,
                    version,
                    kind: AddressKind::Fixed,
                });
        }
        InstanceStatus {
            state: if self.status.is_empty() {
                InstanceState::Pending
            } else {
                InstanceState::from_status(&self.status)
            },
            id: self.pvm_instance_id,
            name: self.server_name,
            attachments,
        }
    }
}

// ── Provider ────────────────────────────────────────────────────────

pub struct PowerVsProvider {
    base_url: String,
    client: reqwest::Client,
    config: ProviderConfig,
}

impl PowerVsProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, SandboxError> {
        tracing::info!(config = ?config, "powervs provider config");
        let base_url = format!(
            "{}/pcloud/v1/cloud-instances/{}",
            config.powervs.api_url.trim_end_matches('/'),
            config.powervs.cloud_instance_id
        );
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            config,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.config.powervs.bearer_token);
        match &self.config.powervs.crn {
            Some(crn) => builder.header("CRN", crn),
            None => builder,
        }
    }

    async fn send(
        &self,
        what: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SandboxError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("powervs {what} failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "powervs {what} returned {status}: {body}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl CloudProvider for PowerVsProvider {
    fn kind(&self) -> CloudBackendKind {
        CloudBackendKind::PowerVs
    }

    fn max_instance_name_len(&self) -> usize {
        MAX_INSTANCE_NAME_LEN
    }

    fn config_verifier(&self) -> Result<(), SandboxError> {
        require("image ID", &self.config.image_id)?;
        require("network ID", &self.config.network_id)?;
        require("cloud instance ID", &self.config.powervs.cloud_instance_id)?;
        require("PowerVS API endpoint", &self.config.powervs.api_url)
    }

    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<InstanceHandle, SandboxError> {
        let settings = &self.config.powervs;
        let body = PvmInstanceCreate {
            server_name: req.name.clone(),
            image_id: req.image_ref,
            key_pair_name: req.ssh_key_ref,
            networks: vec![PvmNetworkRef {
                network_id: req.network_ref,
            }],
            memory: settings.memory_gb,
            processors: settings.processors,
            proc_type: settings.proc_type.clone(),
            sys_type: settings.sys_type.clone(),
            user_data: STANDARD.encode(req.user_data),
        };

        let resp = self
            .send(
                "create",
                self.request(reqwest::Method::POST, "pvm-instances").json(&body),
            )
            .await?;
        let created = resp
            .json::<Vec<PvmInstance>>()
            .await
            .map_err(|e| SandboxError::Serde(format!("failed to parse instance list: {e}")))?;
        let first = created
            .into_iter()
            .next()
            .ok_or_else(|| SandboxError::Provider("powervs create returned no instance".into()))?;

        tracing::info!(
            instance_id = %first.pvm_instance_id,
            name = %first.server_name,
            "powervs accepted instance"
        );
        let status = first.into_status();
        Ok(InstanceHandle {
            id: status.id,
            name: if status.name.is_empty() { req.name } else { status.name },
            state: status.state,
        })
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceStatus, SandboxError> {
        let resp = self
            .send(
                "get",
                self.request(reqwest::Method::GET, &format!("pvm-instances/{id}")),
            )
            .await?;
        resp.json::<PvmInstance>()
            .await
            .map(PvmInstance::into_status)
            .map_err(|e| SandboxError::Serde(format!("failed to parse instance: {e}")))
    }

    async fn delete_instance(&self, id: &str) -> Result<(), SandboxError> {
        self.send(
            "delete",
            self.request(reqwest::Method::DELETE, &format!("pvm-instances/{id}")),
        )
        .await?;
        Ok(())
    }

    async fn resolve_network_name(&self, network_id: &str) -> Result<String, SandboxError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("networks/{network_id}"))
            .send()
            .await
            .map_err(|e| SandboxError::Provider(format!("powervs network lookup failed: {e}")))?;
        if resp.status().as_u16() == 404 {
            return Err(SandboxError::Provider(format!(
                "network {network_id} not found"
            )));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!(
                "powervs network lookup returned {status}: {body}"
            )));
        }
        resp.json::<PvmNetworkInfo>()
            .await
            .map(|n| n.name)
            .map_err(|e| SandboxError::Serde(format!("failed to parse network: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::address::extract_ips;
    use crate::sandbox::testing::serve_stub;
    use axum::Router;
    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use hyper::{HeaderMap, StatusCode};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    const PREFIX: &str = "/pcloud/v1/cloud-instances/ci-1";

    fn config(base: &str) -> ProviderConfig {
        ProviderConfig {
            network_id: "net-1".into(),
            image_id: "img-1".into(),
            ssh_key: Some("ops".into()),
            powervs: PowerVsSettings {
                api_url: base.into(),
                cloud_instance_id: "ci-1".into(),
                crn: Some("crn:v1:bluemix:public:power-iaas:dal12".into()),
                bearer_token: "iam".into(),
                ..PowerVsSettings::default()
            },
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn create_sends_sizing_and_auth_headers() {
        type Seen = Arc<Mutex<Option<(HeaderMap, Value)>>>;
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                &format!("{PREFIX}/pvm-instances"),
                post(
                    |State(seen): State<Seen>, headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                        *seen.lock().unwrap() = Some((headers, body));
                        (
                            StatusCode::CREATED,
                            axum::Json(json!([{
                                "pvmInstanceID": "pvm-1",
                                "serverName": "podvm-nginx",
                                "status": "BUILD"
                            }])),
                        )
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve_stub(app).await;

        let provider = PowerVsProvider::new(config(&base)).unwrap();
        let handle = provider
            .create_instance(CreateInstanceRequest {
                name: "podvm-nginx".into(),
                image_ref: "img-1".into(),
                size_ref: String::new(),
                network_ref: "net-1".into(),
                placement_ref: None,
                ssh_key_ref: Some("ops".into()),
                user_data: "#cloud-config\n".into(),
                labels: BTreeMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(handle.id, "pvm-1");
        assert_eq!(handle.state, InstanceState::Pending);

        let (headers, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(headers["authorization"], "Bearer iam");
        assert_eq!(headers["crn"], "crn:v1:bluemix:public:power-iaas:dal12");
        assert_eq!(body["serverName"], "podvm-nginx");
        assert_eq!(body["imageID"], "img-1");
        assert_eq!(body["keyPairName"], "ops");
        assert_eq!(body["networks"][0]["networkID"], "net-1");
        assert_eq!(body["memory"], 4.0);
        assert_eq!(body["processors"], 0.25);
        assert_eq!(body["procType"], "shared");
        assert_eq!(body["sysType"], "s922");
        assert_eq!(body["userData"], STANDARD.encode("#cloud-config\n"));
    }

    #[tokio::test]
    async fn get_and_network_lookup_feed_address_extraction() {
        let app = Router::new()
            .route(
                &format!("{PREFIX}/pvm-instances/{{id}}"),
                get(|Path(id): Path<String>| async move {
                    axum::Json(json!({
                        "pvmInstanceID": id,
                        "serverName": "podvm-nginx",
                        "status": "ACTIVE",
                        "networks": [
                            { "ipAddress": "192.168.10.4", "networkName": "pod-net", "networkID": "net-1" }
                        ]
                    }))
                }),
            )
            .route(
                &format!("{PREFIX}/networks/{{id}}"),
                get(|Path(id): Path<String>| async move {
                    if id == "net-1" {
                        Ok(axum::Json(json!({ "networkID": id, "name": "pod-net" })))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            );
        let base = serve_stub(app).await;
        let provider = PowerVsProvider::new(config(&base)).unwrap();

        let status = provider.get_instance("pvm-1").await.unwrap();
        assert_eq!(status.state, InstanceState::Active);
        let network = provider.resolve_network_name("net-1").await.unwrap();
        assert_eq!(
            extract_ips(&status, &network).unwrap(),
            vec![Ipv4Addr::new(192, 168, 10, 4)]
        );

        let err = provider.resolve_network_name("net-2").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn verifier_requires_cloud_instance() {
        assert!(PowerVsProvider::new(config("http://pvs")).unwrap().config_verifier().is_ok());

        let mut cfg = config("http://pvs");
        cfg.powervs.cloud_instance_id.clear();
        let err = PowerVsProvider::new(cfg).unwrap().config_verifier().unwrap_err();
        assert!(matches!(err, SandboxError::Config(ref m) if m.contains("cloud instance")));
    }

    #[test]
    fn name_limit() {
        let provider = PowerVsProvider::new(config("http://pvs")).unwrap();
        assert_eq!(provider.max_instance_name_len(), 47);
    }
}

//! Sandbox lifecycle: CreateVM, StartVM, StopVM, Version.
//!
//! One service serves every backend. The provider is chosen once at
//! construction; per-sandbox state lives in the [`SandboxRegistry`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use super::address::extract_ips;
use super::cloudinit::{CloudConfig, DaemonConfig, WriteFile};
use super::error::SandboxError;
use super::naming::instance_name;
use super::podnetwork::WorkerNode;
use super::poller::{wait_for_active, PollPolicy};
use super::provider::CloudProvider;
use super::proxy::{AgentProxyFactory, ProxyOutcome, ProxyTask};
use super::registry::{Sandbox, SandboxRegistry, StartTicket};
use super::types::*;

/// Static settings for the lifecycle service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Parent of the per-sandbox working directories.
    pub pods_dir: PathBuf,
    /// Port of the in-guest daemon serving the agent endpoint.
    pub daemon_port: u16,
    pub poll: PollPolicy,
    pub provider: ProviderConfig,
}

pub struct PodVmService {
    provider: Arc<dyn CloudProvider>,
    worker_node: Arc<dyn WorkerNode>,
    proxies: Arc<dyn AgentProxyFactory>,
    registry: SandboxRegistry,
    settings: ServiceSettings,
    node_name: String,
}

impl PodVmService {
    /// Build the service, taking the node name from the host name.
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        worker_node: Arc<dyn WorkerNode>,
        proxies: Arc<dyn AgentProxyFactory>,
        settings: ServiceSettings,
    ) -> Result<Self, SandboxError> {
        let raw = hostname::get()
            .map_err(|e| SandboxError::Config(format!("failed to get hostname: {e}")))?;
        let node_name = node_name_from_hostname(&raw.to_string_lossy()).ok_or_else(|| {
            SandboxError::Config(format!("hostname {raw:?} yields an empty node name"))
        })?;
        Ok(Self::with_node_name(
            provider,
            worker_node,
            proxies,
            settings,
            node_name,
        ))
    }

    pub fn with_node_name(
        provider: Arc<dyn CloudProvider>,
        worker_node: Arc<dyn WorkerNode>,
        proxies: Arc<dyn AgentProxyFactory>,
        settings: ServiceSettings,
        node_name: String,
    ) -> Self {
        tracing::info!(
            backend = %provider.kind(),
            node = %node_name,
            pods_dir = %settings.pods_dir.display(),
            "pod VM service initialized"
        );
        Self {
            provider,
            worker_node,
            proxies,
            registry: SandboxRegistry::new(),
            settings,
            node_name,
        }
    }

    pub fn backend(&self) -> CloudBackendKind {
        self.provider.kind()
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    // ── CreateVM ────────────────────────────────────────────────────

    /// Register a sandbox and return the path of its agent socket.
    pub async fn create_vm(
        &self,
        id: &str,
        annotations: &HashMap<String, String>,
        netns_path: &str,
    ) -> Result<PathBuf, SandboxError> {
        if id.is_empty() {
            return Err(SandboxError::InvalidArgument("sandbox id is empty".into()));
        }
        if self.registry.contains(id).await {
            return Err(SandboxError::AlreadyExists(id.to_string()));
        }

        let pod = required_annotation(annotations, SANDBOX_NAME_ANNOTATION)?;
        let namespace = required_annotation(annotations, SANDBOX_NAMESPACE_ANNOTATION)?;

        let pod_dir = self.settings.pods_dir.join(id);
        tokio::fs::create_dir_all(&pod_dir).await?;

        let network_config = self
            .worker_node
            .inspect(netns_path)
            .await
            .map_err(|e| network_error("inspect", netns_path, e))?;

        let socket_path = pod_dir.join(AGENT_SOCKET_NAME);
        let proxy = self.proxies.new_proxy(socket_path.clone());

        let sandbox = Sandbox::new(
            id.to_string(),
            pod,
            namespace,
            netns_path.to_string(),
            pod_dir,
            socket_path.clone(),
            network_config,
            proxy,
        );
        self.registry.insert(sandbox).await?;

        tracing::info!(
            sandbox_id = %id,
            socket = %socket_path.display(),
            "sandbox created"
        );
        Ok(socket_path)
    }

    // ── StartVM ─────────────────────────────────────────────────────

    /// Boot the pod VM and bring up the agent proxy.
    ///
    /// A failed start leaves the sandbox registered in CREATED with any
    /// instance or tunnel it created still recorded, so either StopVM or
    /// another StartVM can clean it up. A StopVM arriving meanwhile cancels
    /// this call.
    pub async fn start_vm(&self, id: &str, cancel: &CancellationToken) -> Result<(), SandboxError> {
        let sandbox = self.registry.get(id).await?;
        let ticket = sandbox.begin_start(cancel).await?;
        let cancel = ticket.cancel.clone();

        match self.boot(&sandbox, ticket, &cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(sandbox_id = %id, error = %e, "StartVM failed");
                sandbox.abort_start().await;
                Err(e)
            }
        }
    }

    async fn boot(
        &self,
        sandbox: &Sandbox,
        ticket: StartTicket,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        let id = sandbox.id.as_str();

        if ticket.attempt > 1 {
            self.reset_after_failed_start(sandbox, ticket.stale_instance, ticket.stale_tunnel)
                .await;
        }

        let user_data = self.render_user_data(sandbox).await?;

        let req = CreateInstanceRequest {
            name: instance_name(&sandbox.pod, id, self.provider.max_instance_name_len()),
            image_ref: self.settings.provider.image_id.clone(),
            size_ref: self.settings.provider.flavor_id.clone(),
            network_ref: self.settings.provider.network_id.clone(),
            placement_ref: self.settings.provider.host_group.clone(),
            ssh_key_ref: self.settings.provider.ssh_key.clone(),
            user_data,
            labels: self.labels(sandbox),
        };
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        tracing::info!(sandbox_id = %id, name = %req.name, "creating an instance");

        let handle = self.provider.create_instance(req).await?;
        sandbox.set_instance(handle.id.clone()).await;
        tracing::info!(
            sandbox_id = %id,
            instance_id = %handle.id,
            name = %handle.name,
            "created an instance"
        );

        let activation =
            wait_for_active(self.provider.as_ref(), &handle.id, &self.settings.poll, cancel).await?;

        let network_name = self
            .provider
            .resolve_network_name(&self.settings.provider.network_id)
            .await?;
        let ips = extract_ips(&activation.status, &network_name)?;
        tracing::info!(sandbox_id = %id, instance_id = %handle.id, ips = ?ips, "pod VM addresses");

        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        self.worker_node
            .setup(&sandbox.netns_path, &ips, &sandbox.network_config)
            .await
            .map_err(|e| network_error("setup", &sandbox.netns_path, e))?;
        sandbox.set_tunnel_up().await;

        let target = agent_url(&ips[0], self.settings.daemon_port)?;
        let proxy = sandbox.proxy().await;
        match ProxyTask::spawn(proxy, target.clone()).wait(cancel).await {
            ProxyOutcome::Ready => {
                sandbox.mark_running(ips).await;
                tracing::info!(sandbox_id = %id, agent = %target, "pod VM is running");
                Ok(())
            }
            ProxyOutcome::Failed(e) => Err(e),
            ProxyOutcome::Cancelled => Err(SandboxError::Cancelled),
        }
    }

    /// Drop what an earlier failed StartVM left behind and give the sandbox
    /// a proxy that has never been started.
    async fn reset_after_failed_start(
        &self,
        sandbox: &Sandbox,
        stale: Option<InstanceId>,
        stale_tunnel: bool,
    ) {
        if stale_tunnel {
            tracing::info!(sandbox_id = %sandbox.id, netns = %sandbox.netns_path, "tearing down pod network from failed start");
            if let Err(e) = self
                .worker_node
                .teardown(&sandbox.netns_path, &sandbox.network_config)
                .await
            {
                tracing::warn!(netns = %sandbox.netns_path, error = %e, "failed to tear down pod network from failed start");
            }
        }
        if let Some(instance_id) = stale {
            tracing::info!(sandbox_id = %sandbox.id, instance_id = %instance_id, "deleting instance from failed start");
            if let Err(e) = self.provider.delete_instance(&instance_id).await {
                tracing::warn!(instance_id = %instance_id, error = %e, "failed to delete instance from failed start");
            }
        }
        let old = sandbox.proxy().await;
        if let Err(e) = old.shutdown() {
            tracing::debug!(error = %e, "previous agent proxy shutdown");
        }
        sandbox
            .replace_proxy(self.proxies.new_proxy(sandbox.socket_path.clone()))
            .await;
    }

    async fn render_user_data(&self, sandbox: &Sandbox) -> Result<String, SandboxError> {
        let daemon = DaemonConfig {
            pod_network: sandbox.network_config.clone(),
            pod_namespace: sandbox.namespace.clone(),
            pod_name: sandbox.pod.clone(),
        };
        let content = daemon.to_json()?;
        tokio::fs::write(sandbox.pod_dir.join(DAEMON_CONFIG_FILE), &content).await?;

        CloudConfig {
            write_files: vec![WriteFile {
                path: GUEST_DAEMON_CONFIG_PATH.into(),
                content,
            }],
        }
        .generate()
    }

    fn labels(&self, sandbox: &Sandbox) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("node".to_string(), self.node_name.clone()),
            ("sandbox-id".to_string(), sandbox.id.clone()),
            ("pod".to_string(), sandbox.pod.clone()),
            ("pod-namespace".to_string(), sandbox.namespace.clone()),
        ])
    }

    // ── StopVM ──────────────────────────────────────────────────────

    /// Tear a sandbox down. The record is removed even when a step fails;
    /// failed steps are reported together as `PartialFailure`. A StartVM in
    /// flight is cancelled and awaited before teardown begins.
    pub async fn stop_vm(&self, id: &str) -> Result<(), SandboxError> {
        let sandbox = self.registry.get(id).await?;
        sandbox.begin_stop().await?;
        let mut failures = Vec::new();

        if let Err(e) = sandbox.proxy().await.shutdown() {
            tracing::warn!(sandbox_id = %id, error = %e, "failed to stop agent proxy");
        }

        if let Some(instance_id) = sandbox.instance_id().await {
            tracing::info!(sandbox_id = %id, instance_id = %instance_id, "deleting an instance");
            match self.provider.delete_instance(&instance_id).await {
                Ok(()) => tracing::info!(instance_id = %instance_id, "deleted an instance"),
                Err(e) => {
                    tracing::error!(instance_id = %instance_id, error = %e, "failed to delete an instance");
                    failures.push(format!("delete instance {instance_id}: {e}"));
                }
            }
        }

        if let Err(e) = self
            .worker_node
            .teardown(&sandbox.netns_path, &sandbox.network_config)
            .await
        {
            tracing::error!(sandbox_id = %id, netns = %sandbox.netns_path, error = %e, "failed to tear down pod network");
            failures.push(format!("teardown network {}: {e}", sandbox.netns_path));
        }

        self.registry.delete(id).await;

        if failures.is_empty() {
            tracing::info!(sandbox_id = %id, age_secs = sandbox.age().num_seconds(), "sandbox stopped");
            Ok(())
        } else {
            Err(SandboxError::PartialFailure(failures))
        }
    }
}

fn required_annotation(
    annotations: &HashMap<String, String>,
    key: &str,
) -> Result<String, SandboxError> {
    annotations
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| SandboxError::InvalidArgument(format!("missing annotation {key}")))
}

fn network_error(step: &str, netns: &str, e: SandboxError) -> SandboxError {
    match e {
        SandboxError::NetworkSetup(msg) => SandboxError::NetworkSetup(format!("{step} {netns}: {msg}")),
        other => SandboxError::NetworkSetup(format!("{step} {netns}: {other}")),
    }
}

fn agent_url(ip: &std::net::Ipv4Addr, port: u16) -> Result<Url, SandboxError> {
    Url::parse(&format!("http://{ip}:{port}{AGENT_URL_PATH}"))
        .map_err(|e| SandboxError::Proxy(format!("invalid agent URL: {e}")))
}

/// Short host name: everything before the first dot.
pub fn node_name_from_hostname(hostname: &str) -> Option<String> {
    let short = hostname.split('.').next().unwrap_or_default().trim();
    (!short.is_empty()).then(|| short.to_string())
}

//! In-memory stand-ins for the provider, worker node and agent proxy.

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::SandboxError;
use super::podnetwork::{PodNetworkConfig, WorkerNode};
use super::provider::CloudProvider;
use super::proxy::{AgentProxy, AgentProxyFactory};
use super::types::{
    AddressEntry, AddressKind, CloudBackendKind, CreateInstanceRequest, InstanceHandle,
    InstanceState, InstanceStatus, NetworkAttachments,
};

// ── Provider ────────────────────────────────────────────────────────

pub struct StubProvider {
    states: Mutex<VecDeque<InstanceState>>,
    attachments: Mutex<NetworkAttachments>,
    networks: Mutex<BTreeMap<String, String>>,
    get_calls: AtomicUsize,
    failing_gets: AtomicUsize,
    created: Mutex<Vec<CreateInstanceRequest>>,
    deleted: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    max_name_len: usize,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::with_states(vec![InstanceState::Active])
    }
}

impl StubProvider {
    /// `get_instance` walks through `states`; the last one repeats.
    pub fn with_states(states: Vec<InstanceState>) -> Self {
        let mut attachments = NetworkAttachments::new();
        attachments.insert(
            "pod-net".into(),
            vec![
                entry("10.0.0.7", 4, AddressKind::Fixed),
                entry("fd00::7", 6, AddressKind::Fixed),
                entry("172.24.4.10", 4, AddressKind::Floating),
            ],
        );
        let mut networks = BTreeMap::new();
        networks.insert("net-1".to_string(), "pod-net".to_string());

        Self {
            states: Mutex::new(states.into()),
            attachments: Mutex::new(attachments),
            networks: Mutex::new(networks),
            get_calls: AtomicUsize::new(0),
            failing_gets: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            max_name_len: 63,
        }
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn set_attachments(&self, attachments: NetworkAttachments) {
        *self.attachments.lock().unwrap() = attachments;
    }

    pub fn created(&self) -> Vec<CreateInstanceRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

fn entry(addr: &str, version: u8, kind: AddressKind) -> AddressEntry {
    AddressEntry {
        addr: addr.into(),
        version,
        kind,
    }
}

#[async_trait]
impl CloudProvider for StubProvider {
    fn kind(&self) -> CloudBackendKind {
        CloudBackendKind::OpenStack
    }

    fn max_instance_name_len(&self) -> usize {
        self.max_name_len
    }

    fn config_verifier(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<InstanceHandle, SandboxError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SandboxError::Provider("quota exceeded".into()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(req.clone());
        Ok(InstanceHandle {
            id: format!("i-{}", created.len()),
            name: req.name,
            state: InstanceState::Pending,
        })
    }

    async fn get_instance(&self, id: &str) -> Result<InstanceStatus, SandboxError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_gets.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_gets.store(failing - 1, Ordering::SeqCst);
            return Err(SandboxError::Provider("503 service unavailable".into()));
        }
        let state = {
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().cloned().unwrap_or(InstanceState::Active)
            }
        };
        Ok(InstanceStatus {
            id: id.to_string(),
            name: format!("vm-{id}"),
            state,
            attachments: self.attachments.lock().unwrap().clone(),
        })
    }

    async fn delete_instance(&self, id: &str) -> Result<(), SandboxError> {
        self.deleted.lock().unwrap().push(id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SandboxError::Provider(format!("delete {id}: 500")));
        }
        Ok(())
    }

    async fn resolve_network_name(&self, network_id: &str) -> Result<String, SandboxError> {
        self.networks
            .lock()
            .unwrap()
            .get(network_id)
            .cloned()
            .ok_or_else(|| SandboxError::Provider(format!("network {network_id} not found")))
    }
}

// ── Worker node ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubWorkerNode {
    pub fail_inspect: AtomicBool,
    pub fail_setup: AtomicBool,
    pub fail_teardown: AtomicBool,
    calls: Mutex<Vec<String>>,
    setup_ips: Mutex<Vec<Vec<Ipv4Addr>>>,
}

impl StubWorkerNode {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn setup_ips(&self) -> Vec<Vec<Ipv4Addr>> {
        self.setup_ips.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerNode for StubWorkerNode {
    async fn inspect(&self, netns_path: &str) -> Result<PodNetworkConfig, SandboxError> {
        self.calls.lock().unwrap().push(format!("inspect {netns_path}"));
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(SandboxError::NetworkSetup("no such netns".into()));
        }
        Ok(PodNetworkConfig(json!({
            "podIP": "10.244.1.5",
            "netns": netns_path,
        })))
    }

    async fn setup(
        &self,
        netns_path: &str,
        pod_node_ips: &[Ipv4Addr],
        _config: &PodNetworkConfig,
    ) -> Result<(), SandboxError> {
        self.calls.lock().unwrap().push(format!("setup {netns_path}"));
        self.setup_ips.lock().unwrap().push(pod_node_ips.to_vec());
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(SandboxError::NetworkSetup("vxlan busy".into()));
        }
        Ok(())
    }

    async fn teardown(
        &self,
        netns_path: &str,
        _config: &PodNetworkConfig,
    ) -> Result<(), SandboxError> {
        self.calls.lock().unwrap().push(format!("teardown {netns_path}"));
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(SandboxError::NetworkSetup("netns gone".into()));
        }
        Ok(())
    }
}

// ── Agent proxy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyBehavior {
    Ready,
    FailStart,
    NeverReady,
}

pub struct StubProxy {
    behavior: ProxyBehavior,
    socket_path: PathBuf,
    started_with: Mutex<Option<Url>>,
    shutdown_calls: AtomicUsize,
    stop: CancellationToken,
}

impl StubProxy {
    pub fn new(behavior: ProxyBehavior) -> Self {
        Self::at(behavior, PathBuf::from("/tmp/stub/agent.ttrpc"))
    }

    pub fn at(behavior: ProxyBehavior, socket_path: PathBuf) -> Self {
        Self {
            behavior,
            socket_path,
            started_with: Mutex::new(None),
            shutdown_calls: AtomicUsize::new(0),
            stop: CancellationToken::new(),
        }
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn started_with(&self) -> Option<Url> {
        self.started_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentProxy for StubProxy {
    fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn start(&self, target: Url) -> Result<(), SandboxError> {
        *self.started_with.lock().unwrap() = Some(target);
        match self.behavior {
            ProxyBehavior::FailStart => Err(SandboxError::Proxy("address in use".into())),
            ProxyBehavior::Ready | ProxyBehavior::NeverReady => {
                self.stop.cancelled().await;
                Ok(())
            }
        }
    }

    async fn ready(&self) {
        match self.behavior {
            ProxyBehavior::Ready => {}
            ProxyBehavior::FailStart | ProxyBehavior::NeverReady => {
                std::future::pending::<()>().await
            }
        }
    }

    fn shutdown(&self) -> Result<(), SandboxError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        Ok(())
    }
}

/// Hands out proxies with a fixed behavior and remembers each one.
pub struct StubProxyFactory {
    behavior: Mutex<ProxyBehavior>,
    issued: Mutex<Vec<Arc<StubProxy>>>,
}

impl StubProxyFactory {
    pub fn new(behavior: ProxyBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: ProxyBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn issued(&self) -> Vec<Arc<StubProxy>> {
        self.issued.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Arc<StubProxy>> {
        self.issued.lock().unwrap().last().cloned()
    }
}

impl AgentProxyFactory for StubProxyFactory {
    fn new_proxy(&self, socket_path: PathBuf) -> Arc<dyn AgentProxy> {
        let behavior = *self.behavior.lock().unwrap();
        let proxy = Arc::new(StubProxy::at(behavior, socket_path));
        self.issued.lock().unwrap().push(proxy.clone());
        proxy
    }
}

// ── REST stubs ──────────────────────────────────────────────────────

/// Serve `router` on an ephemeral loopback port and return its base URL.
pub async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

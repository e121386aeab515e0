//! In-flight sandboxes, keyed by sandbox ID.
//!
//! Each operation takes the table lock for one lookup or mutation only.
//! Records are shared (`Arc`), so state written by StartVM is visible to a
//! later StopVM lookup of the same ID.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::error::SandboxError;
use super::podnetwork::PodNetworkConfig;
use super::proxy::AgentProxy;
use super::types::{InstanceId, SandboxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxPhase {
    Created,
    Starting,
    Running,
    /// StopVM has claimed the sandbox; it is about to leave the registry.
    Stopping,
}

pub struct Sandbox {
    pub id: SandboxId,
    pub pod: String,
    pub namespace: String,
    pub netns_path: String,
    pub pod_dir: PathBuf,
    pub socket_path: PathBuf,
    pub network_config: PodNetworkConfig,
    pub created_at: DateTime<Utc>,
    /// Written only while `runtime` is held.
    phase: watch::Sender<SandboxPhase>,
    runtime: Mutex<SandboxRuntime>,
}

struct SandboxRuntime {
    instance_id: Option<InstanceId>,
    pod_ips: Vec<Ipv4Addr>,
    proxy: Arc<dyn AgentProxy>,
    start_attempts: u32,
    start_cancel: Option<CancellationToken>,
    tunnel_up: bool,
}

/// What StartVM needs from the record when it begins.
pub struct StartTicket {
    pub attempt: u32,
    /// Instance left behind by an earlier failed StartVM.
    pub stale_instance: Option<InstanceId>,
    /// An earlier failed StartVM set up the pod network and nothing tore it down.
    pub stale_tunnel: bool,
    /// Fires when the caller cancels or a StopVM interrupts this start.
    pub cancel: CancellationToken,
}

impl Sandbox {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SandboxId,
        pod: String,
        namespace: String,
        netns_path: String,
        pod_dir: PathBuf,
        socket_path: PathBuf,
        network_config: PodNetworkConfig,
        proxy: Arc<dyn AgentProxy>,
    ) -> Self {
        let (phase, _) = watch::channel(SandboxPhase::Created);
        Self {
            id,
            pod,
            namespace,
            netns_path,
            pod_dir,
            socket_path,
            network_config,
            created_at: Utc::now(),
            phase,
            runtime: Mutex::new(SandboxRuntime {
                instance_id: None,
                pod_ips: Vec::new(),
                proxy,
                start_attempts: 0,
                start_cancel: None,
                tunnel_up: false,
            }),
        }
    }

    pub async fn phase(&self) -> SandboxPhase {
        *self.phase.borrow()
    }

    /// Time since CreateVM registered the sandbox.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub async fn instance_id(&self) -> Option<InstanceId> {
        self.runtime.lock().await.instance_id.clone()
    }

    pub async fn pod_ips(&self) -> Vec<Ipv4Addr> {
        self.runtime.lock().await.pod_ips.clone()
    }

    pub async fn proxy(&self) -> Arc<dyn AgentProxy> {
        self.runtime.lock().await.proxy.clone()
    }

    /// Move CREATED → STARTING. Fails if a StartVM is in flight or done, or
    /// if a StopVM has claimed the sandbox.
    pub async fn begin_start(&self, caller: &CancellationToken) -> Result<StartTicket, SandboxError> {
        let mut rt = self.runtime.lock().await;
        let phase = *self.phase.borrow();
        match phase {
            SandboxPhase::Created => {}
            SandboxPhase::Starting => {
                return Err(SandboxError::InvalidArgument(format!(
                    "sandbox {} is already starting",
                    self.id
                )));
            }
            SandboxPhase::Running => {
                return Err(SandboxError::InvalidArgument(format!(
                    "sandbox {} is already running",
                    self.id
                )));
            }
            SandboxPhase::Stopping => return Err(SandboxError::NotFound(self.id.clone())),
        }

        let cancel = caller.child_token();
        rt.start_attempts += 1;
        rt.start_cancel = Some(cancel.clone());
        self.phase.send_replace(SandboxPhase::Starting);
        Ok(StartTicket {
            attempt: rt.start_attempts,
            stale_instance: rt.instance_id.take(),
            stale_tunnel: std::mem::take(&mut rt.tunnel_up),
            cancel,
        })
    }

    /// Claim the sandbox for StopVM. An in-flight StartVM is cancelled and
    /// awaited first, so teardown always starts from CREATED or RUNNING.
    /// A second concurrent StopVM gets `NotFound`.
    pub async fn begin_stop(&self) -> Result<(), SandboxError> {
        loop {
            let mut changes = self.phase.subscribe();
            {
                let rt = self.runtime.lock().await;
                let phase = *self.phase.borrow();
                match phase {
                    SandboxPhase::Created | SandboxPhase::Running => {
                        self.phase.send_replace(SandboxPhase::Stopping);
                        return Ok(());
                    }
                    SandboxPhase::Stopping => return Err(SandboxError::NotFound(self.id.clone())),
                    SandboxPhase::Starting => {
                        if let Some(token) = &rt.start_cancel {
                            token.cancel();
                        }
                    }
                }
            }
            tracing::info!(sandbox_id = %self.id, "waiting for in-flight StartVM to stop");
            // The sender lives as long as `self`, so this only ends on a change.
            let _ = changes
                .wait_for(|phase| *phase != SandboxPhase::Starting)
                .await;
        }
    }

    pub async fn replace_proxy(&self, proxy: Arc<dyn AgentProxy>) {
        self.runtime.lock().await.proxy = proxy;
    }

    pub async fn set_instance(&self, id: InstanceId) {
        self.runtime.lock().await.instance_id = Some(id);
    }

    pub async fn set_tunnel_up(&self) {
        self.runtime.lock().await.tunnel_up = true;
    }

    pub async fn mark_running(&self, ips: Vec<Ipv4Addr>) {
        let mut rt = self.runtime.lock().await;
        rt.pod_ips = ips;
        rt.start_cancel = None;
        self.phase.send_replace(SandboxPhase::Running);
    }

    /// Back to CREATED after a failed StartVM. The instance ID and tunnel
    /// flag are kept so a StopVM or the next StartVM can clean them up.
    pub async fn abort_start(&self) {
        let mut rt = self.runtime.lock().await;
        rt.pod_ips.clear();
        rt.start_cancel = None;
        self.phase.send_replace(SandboxPhase::Created);
    }
}

#[derive(Default)]
pub struct SandboxRegistry {
    sandboxes: RwLock<HashMap<SandboxId, Arc<Sandbox>>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert under one write lock.
    pub async fn insert(&self, sandbox: Sandbox) -> Result<Arc<Sandbox>, SandboxError> {
        let mut map = self.sandboxes.write().await;
        if map.contains_key(&sandbox.id) {
            return Err(SandboxError::AlreadyExists(sandbox.id));
        }
        let sandbox = Arc::new(sandbox);
        map.insert(sandbox.id.clone(), sandbox.clone());
        Ok(sandbox)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Sandbox>, SandboxError> {
        self.sandboxes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))
    }

    /// Idempotent. Returns whether a record was removed.
    pub async fn delete(&self, id: &str) -> bool {
        self.sandboxes.write().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sandboxes.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sandboxes.read().await.len()
    }
}

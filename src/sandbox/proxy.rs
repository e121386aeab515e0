//! Agent proxy: bridges the runtime's agent socket to the in-guest daemon.
//!
//! `ProxyTask` runs a proxy on the runtime and reports exactly one of three
//! outcomes to the caller: ready, failed, or cancelled. The proxy's own
//! shutdown is not tied to which outcome the caller saw.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::SandboxError;

/// Pause after a failed `accept`. Errors like EMFILE persist, so retrying
/// at once would spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
pub trait AgentProxy: Send + Sync {
    fn socket_path(&self) -> &Path;

    /// Serve until `shutdown` is called or the proxy fails.
    async fn start(&self, target: Url) -> Result<(), SandboxError>;

    /// Resolves once the proxy accepts connections.
    async fn ready(&self);

    fn shutdown(&self) -> Result<(), SandboxError>;
}

pub trait AgentProxyFactory: Send + Sync {
    fn new_proxy(&self, socket_path: PathBuf) -> Arc<dyn AgentProxy>;
}

// ── Task handle ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ProxyOutcome {
    Ready,
    Failed(SandboxError),
    Cancelled,
}

pub struct ProxyTask {
    proxy: Arc<dyn AgentProxy>,
    exited: oneshot::Receiver<Result<(), SandboxError>>,
}

impl ProxyTask {
    pub fn spawn(proxy: Arc<dyn AgentProxy>, target: Url) -> Self {
        let (tx, exited) = oneshot::channel();
        let runner = proxy.clone();
        tokio::spawn(async move {
            let result = runner.start(target).await;
            if let Err(e) = &result {
                tracing::warn!(
                    socket = %runner.socket_path().display(),
                    error = %e,
                    "error running agent proxy"
                );
            }
            let _ = tx.send(result);
        });
        Self { proxy, exited }
    }

    /// Wait for the first of: ready, proxy exit, cancellation. On
    /// cancellation the proxy is shut down once before returning.
    pub async fn wait(mut self, cancel: &CancellationToken) -> ProxyOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = self.proxy.shutdown() {
                    tracing::warn!(error = %e, "failed to shut down agent proxy after cancellation");
                }
                ProxyOutcome::Cancelled
            }
            _ = self.proxy.ready() => ProxyOutcome::Ready,
            exit = &mut self.exited => match exit {
                Ok(Err(e)) => ProxyOutcome::Failed(e),
                _ => ProxyOutcome::Failed(SandboxError::Proxy(
                    "agent proxy exited before becoming ready".into(),
                )),
            },
        }
    }
}

// ── Forwarding proxy ────────────────────────────────────────────────

/// Listens on the agent socket and forwards each connection to the guest
/// daemon over TCP.
pub struct ForwardingAgentProxy {
    socket_path: PathBuf,
    ready: watch::Sender<bool>,
    shutdown: CancellationToken,
}

impl ForwardingAgentProxy {
    pub fn new(socket_path: PathBuf) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            socket_path,
            ready,
            shutdown: CancellationToken::new(),
        }
    }

    fn bind(&self) -> io::Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&self.socket_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        UnixListener::bind(&self.socket_path)
    }
}

#[async_trait]
impl AgentProxy for ForwardingAgentProxy {
    fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn start(&self, target: Url) -> Result<(), SandboxError> {
        let host = target
            .host_str()
            .ok_or_else(|| SandboxError::Proxy(format!("agent URL {target} has no host")))?;
        let port = target
            .port_or_known_default()
            .ok_or_else(|| SandboxError::Proxy(format!("agent URL {target} has no port")))?;
        let upstream = format!("{host}:{port}");

        let listener = self.bind().map_err(|e| {
            SandboxError::Proxy(format!(
                "failed to listen on {}: {e}",
                self.socket_path.display()
            ))
        })?;

        tracing::info!(
            socket = %self.socket_path.display(),
            upstream = %upstream,
            "agent proxy listening"
        );
        self.ready.send_replace(true);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(forward(stream, upstream.clone(), self.shutdown.child_token()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "agent proxy accept failed");
                        if !accept_backoff(&self.shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!(socket = %self.socket_path.display(), "agent proxy stopped");
        Ok(())
    }

    async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn shutdown(&self) -> Result<(), SandboxError> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// Wait out `ACCEPT_RETRY_DELAY`. Returns false if shutdown came first.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => true,
    }
}

async fn forward(mut inbound: UnixStream, upstream: String, stop: CancellationToken) {
    let mut outbound = match TcpStream::connect(&upstream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(upstream = %upstream, error = %e, "failed to reach guest agent");
            return;
        }
    };

    tokio::select! {
        _ = stop.cancelled() => {}
        copied = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => match copied {
            Ok((to_guest, from_guest)) => {
                tracing::debug!(to_guest, from_guest, "agent connection closed");
            }
            Err(e) => tracing::debug!(error = %e, "agent connection ended with error"),
        },
    }
}

#[derive(Debug, Default)]
pub struct ForwardingProxyFactory;

impl AgentProxyFactory for ForwardingProxyFactory {
    fn new_proxy(&self, socket_path: PathBuf) -> Arc<dyn AgentProxy> {
        Arc::new(ForwardingAgentProxy::new(socket_path))
    }
}

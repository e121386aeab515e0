//! Pod VM lifecycle: cloud adapters, activation polling, the sandbox
//! registry and the orchestrating service.

pub mod address;
pub mod backends;
pub mod cloudinit;
pub mod error;
pub mod naming;
pub mod podnetwork;
pub mod poller;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backends::ProviderRegistry;
pub use error::SandboxError;
pub use podnetwork::{PassthroughWorkerNode, PodNetworkConfig, WorkerNode};
pub use poller::PollPolicy;
pub use provider::CloudProvider;
pub use proxy::{AgentProxy, AgentProxyFactory, ForwardingProxyFactory};
pub use service::{PodVmService, ServiceSettings};
pub use types::*;

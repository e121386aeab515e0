pub mod nova;
pub mod openstack;
pub mod powervc;
pub mod powervs;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sandbox::error::SandboxError;
use crate::sandbox::provider::CloudProvider;
use crate::sandbox::types::ProviderConfig;

pub use openstack::OpenStackProvider;
pub use powervc::PowerVcProvider;
pub use powervs::PowerVsProvider;

pub type ProviderFactory = fn(ProviderConfig) -> Result<Arc<dyn CloudProvider>, SandboxError>;

/// Named cloud adapters, assembled once at startup.
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the openstack, powervc and powervs adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("openstack", build_openstack);
        registry.register("powervc", build_powervc);
        registry.register("powervs", build_powervs);
        registry
    }

    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the named adapter and run its config verifier.
    pub fn build(
        &self,
        name: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn CloudProvider>, SandboxError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SandboxError::UnknownBackend(name.to_string()))?;
        let provider = factory(config)?;
        provider.config_verifier()?;
        tracing::info!(backend = %name, "initialized cloud provider");
        Ok(provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn build_openstack(config: ProviderConfig) -> Result<Arc<dyn CloudProvider>, SandboxError> {
    Ok(Arc::new(OpenStackProvider::new(config)?))
}

fn build_powervc(config: ProviderConfig) -> Result<Arc<dyn CloudProvider>, SandboxError> {
    Ok(Arc::new(PowerVcProvider::new(config)?))
}

fn build_powervs(config: ProviderConfig) -> Result<Arc<dyn CloudProvider>, SandboxError> {
    Ok(Arc::new(PowerVsProvider::new(config)?))
}

pub(crate) fn require(field: &str, value: &str) -> Result<(), SandboxError> {
    if value.trim().is_empty() {
        return Err(SandboxError::Config(format!("{field} is empty")));
    }
    Ok(())
}

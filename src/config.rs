use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::sandbox::{OpenStackEndpoints, PollPolicy, PowerVsSettings, ProviderConfig};

/// Command line, with every flag also readable from the environment.
#[derive(Parser)]
#[command(name = "podvm-adaptor", version, about = "Peer-pod VM lifecycle service")]
pub struct Cli {
    /// Cloud backend: openstack, powervc or powervs
    #[arg(long, env = "PODVM_BACKEND", default_value = "openstack")]
    pub backend: String,

    /// Unix socket the lifecycle API listens on
    #[arg(long, env = "PODVM_SOCKET", default_value = "/run/peerpod/hypervisor.sock")]
    pub socket: PathBuf,

    /// Parent of the per-sandbox working directories
    #[arg(long, env = "PODVM_PODS_DIR", default_value = "/run/peerpod/pods")]
    pub pods_dir: PathBuf,

    /// Port of the in-guest daemon
    #[arg(long, env = "PODVM_DAEMON_PORT", default_value_t = 15150)]
    pub daemon_port: u16,

    /// Seconds to wait for a new instance to become ACTIVE
    #[arg(long, env = "PODVM_ACTIVATION_TIMEOUT", default_value_t = 150)]
    pub activation_timeout_secs: u64,

    /// Upper bound on the delay between activation polls, in milliseconds
    #[arg(long, env = "PODVM_POLL_MAX_DELAY_MS", default_value_t = 5000)]
    pub poll_max_delay_ms: u64,

    // ── Instance template ──
    #[arg(long, env = "PODVM_NETWORK_ID", default_value = "")]
    pub network_id: String,
    #[arg(long, env = "PODVM_IMAGE_ID", default_value = "")]
    pub image_id: String,
    #[arg(long, env = "PODVM_FLAVOR_ID", default_value = "")]
    pub flavor_id: String,
    /// Key pair name (openstack, powervs) or public key (powervc)
    #[arg(long, env = "PODVM_SSH_KEY")]
    pub ssh_key: Option<String>,
    /// Availability zone / host group
    #[arg(long, env = "PODVM_HOST_GROUP")]
    pub host_group: Option<String>,

    // ── OpenStack / PowerVC ──
    #[arg(long, env = "OS_COMPUTE_URL", default_value = "")]
    pub compute_url: String,
    #[arg(long, env = "OS_NETWORK_URL", default_value = "")]
    pub network_url: String,
    #[arg(long, env = "OS_AUTH_TOKEN", default_value = "", hide_env_values = true)]
    pub auth_token: String,

    // ── PowerVS ──
    #[arg(long, env = "POWERVS_API_URL", default_value = "")]
    pub powervs_api_url: String,
    #[arg(long, env = "POWERVS_CLOUD_INSTANCE_ID", default_value = "")]
    pub powervs_cloud_instance_id: String,
    #[arg(long, env = "POWERVS_CRN")]
    pub powervs_crn: Option<String>,
    #[arg(long, env = "POWERVS_TOKEN", default_value = "", hide_env_values = true)]
    pub powervs_token: String,
    #[arg(long, env = "POWERVS_MEMORY_GB", default_value_t = 4.0)]
    pub powervs_memory_gb: f64,
    #[arg(long, env = "POWERVS_PROCESSORS", default_value_t = 0.25)]
    pub powervs_processors: f64,
    #[arg(long, env = "POWERVS_PROC_TYPE", default_value = "shared")]
    pub powervs_proc_type: String,
    #[arg(long, env = "POWERVS_SYS_TYPE", default_value = "s922")]
    pub powervs_sys_type: String,

    // ── Observability ──
    #[arg(long, env = "SENTRY_DSN", hide_env_values = true)]
    pub sentry_dsn: Option<String>,
    #[arg(long, env = "ENVIRONMENT", default_value = "local")]
    pub environment: String,
}

/// Process configuration after normalization.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: String,
    pub socket: PathBuf,
    pub pods_dir: PathBuf,
    pub daemon_port: u16,
    pub poll: PollPolicy,
    pub provider: ProviderConfig,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Self {
        let poll = PollPolicy {
            timeout: Duration::from_secs(cli.activation_timeout_secs),
            max_delay: Duration::from_millis(cli.poll_max_delay_ms.max(1)),
            ..PollPolicy::default()
        };

        let provider = ProviderConfig {
            network_id: cli.network_id,
            image_id: cli.image_id,
            flavor_id: cli.flavor_id,
            ssh_key: non_empty(cli.ssh_key),
            host_group: non_empty(cli.host_group),
            openstack: OpenStackEndpoints {
                compute_url: cli.compute_url,
                network_url: cli.network_url,
                auth_token: cli.auth_token,
            },
            powervs: PowerVsSettings {
                api_url: cli.powervs_api_url,
                cloud_instance_id: cli.powervs_cloud_instance_id,
                crn: non_empty(cli.powervs_crn),
                bearer_token: cli.powervs_token,
                memory_gb: cli.powervs_memory_gb,
                processors: cli.powervs_processors,
                proc_type: cli.powervs_proc_type,
                sys_type: cli.powervs_sys_type,
            },
        };

        let environment = if cli.environment.is_empty() {
            "local".to_string()
        } else {
            cli.environment
        };

        Config {
            backend: cli.backend.to_ascii_lowercase(),
            socket: cli.socket,
            pods_dir: cli.pods_dir,
            daemon_port: cli.daemon_port,
            poll,
            provider,
            sentry_dsn: non_empty(cli.sentry_dsn),
            environment,
        }
    }

    /// Build a Config from argv-style values. Used directly in tests.
    pub fn from_raw_values<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args).map(Self::from_cli)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

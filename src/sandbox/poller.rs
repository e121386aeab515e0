//! Waits for a freshly created instance to become ACTIVE.
//!
//! Attempts are unbounded; the loop ends on ACTIVE, ERROR, the overall
//! deadline, or cancellation. The delay between attempts doubles from
//! `initial_delay` up to `max_delay`.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::SandboxError;
use super::provider::CloudProvider;
use super::types::{InstanceState, InstanceStatus};

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(150),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct Activation {
    pub status: InstanceStatus,
    /// Number of `get_instance` calls made, including the successful one.
    pub polls: u32,
}

pub async fn wait_for_active(
    provider: &dyn CloudProvider,
    instance_id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<Activation, SandboxError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut polls = 0u32;
    let mut last_seen = String::from("no state reported");

    tracing::info!(instance_id = %instance_id, "waiting for instance to reach state: ACTIVE");

    loop {
        polls += 1;
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(timed_out(instance_id, policy, &last_seen));
            }
            r = provider.get_instance(instance_id) => r,
        };

        match attempt {
            Ok(status) => match &status.state {
                InstanceState::Active => {
                    tracing::info!(
                        instance_id = %instance_id,
                        polls,
                        elapsed_ms = started.elapsed().as_millis(),
                        "instance is in desired state: ACTIVE"
                    );
                    return Ok(Activation { status, polls });
                }
                InstanceState::Error => {
                    return Err(SandboxError::State(instance_id.to_string()));
                }
                other => {
                    tracing::debug!(instance_id = %instance_id, state = ?other, "current VM state");
                    last_seen = format!("last state {other:?}");
                }
            },
            Err(e) => {
                tracing::warn!(instance_id = %instance_id, error = %e, "failed to get the instance");
                last_seen = e.to_string();
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(timed_out(instance_id, policy, &last_seen));
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(policy.max_delay);
    }
}

fn timed_out(instance_id: &str, policy: &PollPolicy, last_seen: &str) -> SandboxError {
    SandboxError::Timeout(format!(
        "instance {instance_id} not ACTIVE after {}s ({last_seen})",
        policy.timeout.as_secs()
    ))
}

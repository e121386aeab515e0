use std::net::Ipv4Addr;

use super::error::SandboxError;
use super::types::{AddressKind, InstanceStatus};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AddressError {
    #[error("instance {instance} has no attachment on network {network}")]
    NetworkNotFound { instance: String, network: String },

    #[error("instance {instance} has no fixed IPv4 address on network {network}")]
    NoFixedIpv4 { instance: String, network: String },

    #[error("failed to parse pod node IP {0:?}")]
    MalformedAddress(String),
}

impl From<AddressError> for SandboxError {
    fn from(e: AddressError) -> Self {
        SandboxError::Provider(e.to_string())
    }
}

/// Fixed IPv4 addresses of `status` on `network_name`, in attachment order.
pub fn extract_ips(
    status: &InstanceStatus,
    network_name: &str,
) -> Result<Vec<Ipv4Addr>, AddressError> {
    let entries = status
        .attachments
        .get(network_name)
        .ok_or_else(|| AddressError::NetworkNotFound {
            instance: status.name.clone(),
            network: network_name.to_string(),
        })?;

    let mut ips = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.kind != AddressKind::Fixed || entry.version != 4 {
            continue;
        }
        let ip: Ipv4Addr = entry
            .addr
            .parse()
            .map_err(|_| AddressError::MalformedAddress(entry.addr.clone()))?;
        tracing::debug!(index = i, ip = %ip, "pod node IP");
        ips.push(ip);
    }

    if ips.is_empty() {
        return Err(AddressError::NoFixedIpv4 {
            instance: status.name.clone(),
            network: network_name.to_string(),
        });
    }
    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::types::{AddressEntry, InstanceState, NetworkAttachments};

    fn entry(addr: &str, version: u8, kind: AddressKind) -> AddressEntry {
        AddressEntry {
            addr: addr.into(),
            version,
            kind,
        }
    }

    fn status(attachments: NetworkAttachments) -> InstanceStatus {
        InstanceStatus {
            id: "i-1".into(),
            name: "podvm-nginx-abcdef01".into(),
            state: InstanceState::Active,
            attachments,
        }
    }

    #[test]
    fn keeps_only_fixed_ipv4_in_order() {
        let mut att = NetworkAttachments::new();
        att.insert(
            "pod-net".into(),
            vec![
                entry("10.0.0.7", 4, AddressKind::Fixed),
                entry("fd00::7", 6, AddressKind::Fixed),
                entry("203.0.113.9", 4, AddressKind::Floating),
                entry("10.0.0.3", 4, AddressKind::Fixed),
            ],
        );
        let ips = extract_ips(&status(att), "pod-net").unwrap();
        assert_eq!(
            ips,
            vec![Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 0, 3)]
        );
    }

    #[test]
    fn missing_network_is_named_error() {
        let mut att = NetworkAttachments::new();
        att.insert("other".into(), vec![entry("10.0.0.7", 4, AddressKind::Fixed)]);
        let err = extract_ips(&status(att), "pod-net").unwrap_err();
        assert!(matches!(err, AddressError::NetworkNotFound { .. }));
    }

    #[test]
    fn no_qualifying_address_is_error() {
        let mut att = NetworkAttachments::new();
        att.insert(
            "pod-net".into(),
            vec![
                entry("fd00::7", 6, AddressKind::Fixed),
                entry("203.0.113.9", 4, AddressKind::Floating),
            ],
        );
        let err = extract_ips(&status(att), "pod-net").unwrap_err();
        assert!(matches!(err, AddressError::NoFixedIpv4 { .. }));
    }

    #[test]
    fn malformed_fixed_address_fails() {
        let mut att = NetworkAttachments::new();
        att.insert("pod-net".into(), vec![entry("10.0.0.300", 4, AddressKind::Fixed)]);
        let err = extract_ips(&status(att), "pod-net").unwrap_err();
        assert_eq!(err, AddressError::MalformedAddress("10.0.0.300".into()));
    }

    #[test]
    fn converts_into_provider_error() {
        let err: SandboxError = AddressError::MalformedAddress("x".into()).into();
        assert!(matches!(err, SandboxError::Provider(_)));
    }
}

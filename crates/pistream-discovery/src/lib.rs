//! mDNS discovery of streaming hosts.
//!
//! Hosts advertise `_nvstream._tcp.local.` on their HTTP control port.
//! [`DiscoveryService::browse`] listens for a fixed window and returns every
//! host that resolved during it, one entry per service instance.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), pistream_discovery::DiscoveryError> {
//! use std::time::Duration;
//! use pistream_discovery::DiscoveryService;
//!
//! for host in DiscoveryService::new().browse(Duration::from_secs(3)).await? {
//!     println!("{host}");
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SERVICE_TYPE: &str = "_nvstream._tcp.local.";
pub const DEFAULT_BROWSE_TIMEOUT: Duration = Duration::from_secs(3);

// MARK: - DiscoveredHost

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    /// Service instance name, usually the host's computer name.
    pub name: String,
    /// mDNS hostname without the trailing dot.
    pub hostname: String,
    pub address: IpAddr,
    pub port: u16,
}

impl DiscoveredHost {
    fn from_service(info: &ServiceInfo) -> Option<Self> {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().map(|a| IpAddr::from(*a)).collect();
        addresses.sort();
        let address = addresses.into_iter().next()?;
        Some(Self {
            name: instance_name(info.get_fullname()).to_owned(),
            hostname: info.get_hostname().trim_end_matches('.').to_owned(),
            address,
            port: info.get_port(),
        })
    }
}

impl fmt::Display for DiscoveredHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.address, self.hostname)
    }
}

/// `"MYPC._nvstream._tcp.local."` → `"MYPC"`.
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}

/// Adds `host` unless an entry with the same instance name is already known.
fn merge(hosts: &mut Vec<DiscoveredHost>, host: DiscoveredHost) -> bool {
    if hosts.iter().any(|h| h.name == host.name) {
        return false;
    }
    hosts.push(host);
    true
}

// MARK: - DiscoveryService

#[derive(Debug, Default)]
pub struct DiscoveryService;

impl DiscoveryService {
    pub fn new() -> Self {
        Self
    }

    /// Browses for `timeout` and returns the hosts found, in discovery order.
    pub async fn browse(&self, timeout: Duration) -> Result<Vec<DiscoveredHost>, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::DaemonFailed(e.to_string()))?;
        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::BrowseFailed(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut hosts = Vec::new();
        loop {
            let event = match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    warn!("[Discovery] Browse channel closed: {}", e);
                    break;
                }
                Err(_) => break,
            };
            match event {
                ServiceEvent::ServiceResolved(info) => match DiscoveredHost::from_service(&info) {
                    Some(host) => {
                        info!("[Discovery] Found host: {}", host);
                        merge(&mut hosts, host);
                    }
                    None => debug!("[Discovery] {} resolved without an address", info.get_fullname()),
                },
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    debug!("[Discovery] Host gone: {}", fullname);
                    hosts.retain(|h| h.name != instance_name(&fullname));
                }
                _ => {}
            }
        }

        if let Err(e) = daemon.stop_browse(SERVICE_TYPE) {
            debug!("[Discovery] stop_browse: {}", e);
        }
        if let Err(e) = daemon.shutdown() {
            debug!("[Discovery] shutdown: {}", e);
        }
        Ok(hosts)
    }
}

// MARK: - DiscoveryError

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon failed to start: {0}")]
    DaemonFailed(String),

    #[error("Failed to browse service: {0}")]
    BrowseFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn service(instance: &str, ips: &str) -> ServiceInfo {
        ServiceInfo::new(SERVICE_TYPE, instance, "gaming-pc.local.", ips, 47989, None::<HashMap<String, String>>)
            .unwrap()
    }

    #[test]
    fn instance_name_strips_the_service_type() {
        assert_eq!(instance_name("GAMING-PC._nvstream._tcp.local."), "GAMING-PC");
        assert_eq!(instance_name("odd-name"), "odd-name");
    }

    #[test]
    fn resolved_service_becomes_a_host() {
        let host = DiscoveredHost::from_service(&service("GAMING-PC", "192.168.1.20")).unwrap();
        assert_eq!(host.name, "GAMING-PC");
        assert_eq!(host.hostname, "gaming-pc.local");
        assert_eq!(host.address, "192.168.1.20".parse::<IpAddr>().unwrap());
        assert_eq!(host.port, 47989);
        assert_eq!(host.to_string(), "GAMING-PC (192.168.1.20, gaming-pc.local)");
    }

    #[test]
    fn lowest_address_is_picked() {
        let host = DiscoveredHost::from_service(&service("PC", "192.168.1.30,10.0.0.4")).unwrap();
        assert_eq!(host.address, "10.0.0.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn duplicate_instances_are_merged() {
        let mut hosts = Vec::new();
        let a = DiscoveredHost::from_service(&service("PC", "192.168.1.30")).unwrap();
        assert!(merge(&mut hosts, a.clone()));
        assert!(!merge(&mut hosts, a));
        assert_eq!(hosts.len(), 1);
    }
}

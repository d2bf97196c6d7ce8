//! Unique id derivation from the machine's hardware address.
//!
//! Scans `/sys/class/net` the same way every time so the host, which keys
//! its pairing records on this id, sees one stable client.

use std::path::Path;

use pistream_core::IdentityError;
use tracing::{debug, info};

pub const SYSFS_NET: &str = "/sys/class/net";

/// ARPHRD_ETHER; wireless interfaces report it too.
const ARPHRD_ETHER: &str = "1";

/// Lowercase hex of the first physical interface's MAC, no separators.
///
/// Interfaces are visited in name order so ties resolve to the
/// lexicographically smallest name. Loopback, virtual interfaces (no
/// `device` link) and all-zero addresses are skipped.
pub fn unique_id_from(net_root: &Path) -> Result<String, IdentityError> {
    let mut names: Vec<String> = match std::fs::read_dir(net_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            debug!("Cannot list {}: {}", net_root.display(), e);
            return Err(IdentityError::NoNetworkInterface);
        }
    };
    names.sort();

    for name in names {
        if name == "lo" {
            continue;
        }
        let iface = net_root.join(&name);
        if !iface.join("device").exists() {
            debug!("Skipping virtual interface {}", name);
            continue;
        }
        if let Ok(kind) = std::fs::read_to_string(iface.join("type")) {
            if kind.trim() != ARPHRD_ETHER {
                continue;
            }
        }
        let Ok(address) = std::fs::read_to_string(iface.join("address")) else {
            continue;
        };
        if let Some(id) = parse_mac(address.trim()) {
            info!("Unique id derived from {} ({})", name, address.trim());
            return Ok(id);
        }
    }

    Err(IdentityError::NoNetworkInterface)
}

/// `aa:bb:cc:dd:ee:ff` → `aabbccddeeff`; `None` for malformed or all-zero.
fn parse_mac(address: &str) -> Option<String> {
    let octets: Vec<u8> = address
        .split(':')
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<Result<_, _>>()
        .ok()?;
    if octets.len() != 6 || octets.iter().all(|&b| b == 0) {
        return None;
    }
    Some(octets.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn iface(root: &Path, name: &str, mac: &str, physical: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
        fs::write(dir.join("type"), "1\n").unwrap();
        if physical {
            fs::create_dir_all(dir.join("device")).unwrap();
        }
    }

    #[test]
    fn picks_smallest_physical_interface() {
        let tmp = tempfile::tempdir().unwrap();
        iface(tmp.path(), "wlan0", "B8:27:EB:00:00:02", true);
        iface(tmp.path(), "eth0", "B8:27:EB:00:00:01", true);
        iface(tmp.path(), "docker0", "02:42:ac:11:00:02", false);
        let lo = tmp.path().join("lo");
        fs::create_dir_all(lo.join("device")).unwrap();
        fs::write(lo.join("address"), "00:00:00:00:00:00\n").unwrap();

        let id = unique_id_from(tmp.path()).unwrap();
        assert_eq!(id, "b827eb000001");
        assert_eq!(id.len(), 12);
        assert_eq!(unique_id_from(tmp.path()).unwrap(), id);
    }

    #[test]
    fn zero_and_malformed_addresses_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        iface(tmp.path(), "eth0", "00:00:00:00:00:00", true);
        iface(tmp.path(), "eth1", "not-a-mac", true);
        iface(tmp.path(), "eth2", "de:ad:be:ef:00:01", true);
        assert_eq!(unique_id_from(tmp.path()).unwrap(), "deadbeef0001");
    }

    #[test]
    fn no_interface_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        iface(tmp.path(), "veth1", "02:00:00:00:00:01", false);
        assert!(matches!(
            unique_id_from(tmp.path()),
            Err(IdentityError::NoNetworkInterface)
        ));
    }
}

//! Interface inspection via sysfs and `ip`.
//!
//! The monitor interface (e.g. `mon0`) shares its MAC with a managed
//! interface (e.g. `wlan0`). The managed one carries the IPv4 network that the
//! active ARP probe scans.

use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;

use pisentry_core::MacAddress;

use crate::error::NetError;

/// Everything the runtime needs to know about the local radio setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub monitor_interface: String,
    pub managed_interface: String,
    pub own_mac: MacAddress,
    pub network: Ipv4Network,
}

/// IPv4 address with prefix length, e.g. `192.168.1.23/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Network {
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        (prefix <= 32).then_some(Self { addr, prefix })
    }

    /// The network address (host bits zeroed) with the same prefix.
    pub fn network(&self) -> Self {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        };
        Self {
            addr: Ipv4Addr::from(u32::from(self.addr) & mask),
            prefix: self.prefix,
        }
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Reads interface facts from a sysfs `class/net` directory.
#[derive(Debug, Clone)]
pub struct InterfaceInspector {
    root: PathBuf,
}

impl Default for InterfaceInspector {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl InterfaceInspector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn attr(&self, interface: &str, name: &str) -> PathBuf {
        self.root.join(interface).join(name)
    }

    pub fn exists(&self, interface: &str) -> bool {
        self.root.join(interface).exists()
    }

    /// True when the interface is an 802.11 monitor type (`type` 80x) and is
    /// not administratively down.
    pub fn is_monitor_mode(&self, interface: &str) -> Result<bool, NetError> {
        let kind = read_attr(&self.attr(interface, "type"))
            .map_err(|_| NetError::InterfaceNotFound(interface.to_string()))?;
        let operstate = read_attr(&self.attr(interface, "operstate"))
            .map_err(|_| NetError::InterfaceNotFound(interface.to_string()))?;
        Ok(kind.starts_with("80") && !operstate.starts_with("down"))
    }

    pub fn mac_address(&self, interface: &str) -> Result<MacAddress, NetError> {
        let path = self.attr(interface, "address");
        let raw = read_attr(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NetError::InterfaceNotFound(interface.to_string()),
            _ => NetError::MacUnavailable {
                interface: interface.to_string(),
                detail: e.to_string(),
            },
        })?;
        raw.parse().map_err(|e: pisentry_core::CoreError| NetError::MacUnavailable {
            interface: interface.to_string(),
            detail: e.to_string(),
        })
    }

    /// Find the non-loopback interface, other than `monitor`, sharing `mac`.
    pub fn find_managed_peer(
        &self,
        monitor: &str,
        mac: &MacAddress,
    ) -> Result<Option<String>, NetError> {
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "lo" && name != monitor)
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .find(|name| self.mac_address(name).is_ok_and(|m| m == *mac)))
    }

    /// Resolve the full radio setup for `monitor`.
    pub fn network_context(&self, monitor: &str) -> Result<NetworkContext, NetError> {
        let own_mac = self.mac_address(monitor)?;
        let managed = self
            .find_managed_peer(monitor, &own_mac)?
            .ok_or_else(|| NetError::NoNetworkAddress(monitor.to_string()))?;
        let network = ipv4_network(&managed)?;
        tracing::debug!("calculated network {network} from interface {managed}");
        Ok(NetworkContext {
            monitor_interface: monitor.to_string(),
            managed_interface: managed,
            own_mac,
            network,
        })
    }
}

fn read_attr(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Network of the first IPv4 address on `interface`, via `ip -o -4 addr`.
pub fn ipv4_network(interface: &str) -> Result<Ipv4Network, NetError> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show", "dev", interface])
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(NetError::CommandFailed(format!(
            "ip addr show {interface}: {}",
            stderr.trim()
        )));
    }
    parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout))
        .map(|n| n.network())
        .ok_or_else(|| NetError::NoNetworkAddress(interface.to_string()))
}

/// Pick the `inet a.b.c.d/p` token from `ip -o -4 addr show` output.
pub fn parse_ip_addr_output(output: &str) -> Option<Ipv4Network> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|&t| t == "inet")?;
        Ipv4Network::parse(tokens.next()?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_iface(root: &Path, name: &str, kind: &str, operstate: &str, mac: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("type"), format!("{kind}\n")).expect("type");
        fs::write(dir.join("operstate"), format!("{operstate}\n")).expect("operstate");
        fs::write(dir.join("address"), format!("{mac}\n")).expect("address");
    }

    fn sysfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_iface(dir.path(), "lo", "772", "unknown", "00:00:00:00:00:00");
        fake_iface(dir.path(), "mon0", "803", "unknown", "b8:27:eb:00:00:01");
        fake_iface(dir.path(), "wlan0", "1", "up", "b8:27:eb:00:00:01");
        fake_iface(dir.path(), "eth0", "1", "up", "b8:27:eb:00:00:99");
        dir
    }

    #[test]
    fn monitor_mode_detection() {
        let dir = sysfs();
        let inspector = InterfaceInspector::new(dir.path());
        assert!(inspector.is_monitor_mode("mon0").expect("readable"));
        assert!(!inspector.is_monitor_mode("wlan0").expect("readable"));
    }

    #[test]
    fn monitor_interface_down_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_iface(dir.path(), "mon0", "803", "down", "b8:27:eb:00:00:01");
        let inspector = InterfaceInspector::new(dir.path());
        assert!(!inspector.is_monitor_mode("mon0").expect("readable"));
    }

    #[test]
    fn missing_interface_is_reported() {
        let dir = sysfs();
        let inspector = InterfaceInspector::new(dir.path());
        assert!(!inspector.exists("mon9"));
        assert!(matches!(
            inspector.is_monitor_mode("mon9"),
            Err(NetError::InterfaceNotFound(name)) if name == "mon9"
        ));
        assert!(matches!(
            inspector.mac_address("mon9"),
            Err(NetError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn managed_peer_shares_mac() {
        let dir = sysfs();
        let inspector = InterfaceInspector::new(dir.path());
        let mac = inspector.mac_address("mon0").expect("mac");
        assert_eq!(mac.to_string(), "b8:27:eb:00:00:01");
        assert_eq!(
            inspector.find_managed_peer("mon0", &mac).expect("scan"),
            Some("wlan0".to_string())
        );
    }

    #[test]
    fn no_managed_peer() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_iface(dir.path(), "mon0", "803", "up", "b8:27:eb:00:00:01");
        let inspector = InterfaceInspector::new(dir.path());
        let mac = inspector.mac_address("mon0").expect("mac");
        assert_eq!(inspector.find_managed_peer("mon0", &mac).expect("scan"), None);
    }

    #[test]
    fn parse_ip_output_and_network() {
        let out = "3: wlan0    inet 192.168.1.23/24 brd 192.168.1.255 scope global dynamic wlan0\\       valid_lft 80000sec preferred_lft 80000sec\n";
        let net = parse_ip_addr_output(out).expect("inet found");
        assert_eq!(net.to_string(), "192.168.1.23/24");
        assert_eq!(net.network().to_string(), "192.168.1.0/24");
    }

    #[test]
    fn parse_ip_output_without_inet() {
        assert_eq!(parse_ip_addr_output(""), None);
        assert_eq!(parse_ip_addr_output("3: wlan0 link/ether b8:27:eb:00:00:01"), None);
    }

    #[test]
    fn network_edge_prefixes() {
        let all = Ipv4Network::parse("10.1.2.3/0").expect("valid");
        assert_eq!(all.network().to_string(), "0.0.0.0/0");
        let host = Ipv4Network::parse("10.1.2.3/32").expect("valid");
        assert_eq!(host.network().to_string(), "10.1.2.3/32");
        assert_eq!(Ipv4Network::parse("10.1.2.3/33"), None);
        assert_eq!(Ipv4Network::parse("10.1.2.3"), None);
    }
}

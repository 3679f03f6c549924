//! Active presence probe: unicast ARP to a specific MAC.
//!
//! Asks every address of the local network "who has" with the Ethernet
//! destination set to the trusted MAC, so only that device can answer.

use std::net::Ipv4Addr;
use std::process::Command;
use std::time::Duration;

use pisentry_core::MacAddress;

use crate::error::NetError;

/// Answer to one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReply {
    pub responded: bool,
    pub address: Option<Ipv4Addr>,
}

impl ProbeReply {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn answered(address: Ipv4Addr) -> Self {
        Self {
            responded: true,
            address: Some(address),
        }
    }
}

/// Trait for probing a device's presence. Enables mock injection for testing.
pub trait ActiveProbe: Send + Sync {
    fn probe(
        &self,
        mac: &MacAddress,
        network: &str,
        timeout: Duration,
    ) -> Result<ProbeReply, NetError>;
}

/// Real probe using the `arp-scan` binary on the managed interface.
pub struct ArpScanProbe {
    bin: String,
    interface: String,
}

impl ArpScanProbe {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            bin: "arp-scan".to_string(),
            interface: interface.into(),
        }
    }

    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    fn args(&self, mac: &MacAddress, network: &str, timeout: Duration) -> Vec<String> {
        vec![
            format!("--interface={}", self.interface),
            format!("--destaddr={mac}"),
            format!("--timeout={}", timeout.as_millis()),
            "--retry=1".to_string(),
            "--quiet".to_string(),
            "--plain".to_string(),
            network.to_string(),
        ]
    }
}

impl ActiveProbe for ArpScanProbe {
    fn probe(
        &self,
        mac: &MacAddress,
        network: &str,
        timeout: Duration,
    ) -> Result<ProbeReply, NetError> {
        let output = Command::new(&self.bin)
            .args(self.args(mac, network, timeout))
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NetError::CommandFailed(format!(
                "{} exit code {}: {}",
                self.bin,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_arp_scan_output(&stdout, mac).map_or_else(ProbeReply::silent, ProbeReply::answered))
    }
}

/// First IPv4 address that answered from exactly `mac`.
///
/// Lines look like `192.168.1.5\taa:bb:cc:dd:ee:ff[\tvendor]`; replies from
/// any other hardware address are ignored.
pub fn parse_arp_scan_output(output: &str, mac: &MacAddress) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut cols = line.split_whitespace();
        let ip: Ipv4Addr = cols.next()?.parse().ok()?;
        let hw: MacAddress = cols.next()?.parse().ok()?;
        (hw == *mac).then_some(ip)
    })
}

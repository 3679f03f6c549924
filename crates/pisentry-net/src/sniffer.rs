//! Passive packet capture on the monitor interface.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use pisentry_core::MacAddress;

use crate::error::NetError;

/// Source of sightings. `run` blocks for the lifetime of the capture and
/// calls `sink` for every hardware address seen in a matching frame.
///
/// Returning at all (with or without an error) means the capture stopped.
pub trait PacketCapture: Send + Sync {
    fn run(
        &self,
        filter: &str,
        sink: &mut dyn FnMut(MacAddress, DateTime<Utc>),
    ) -> Result<(), NetError>;
}

/// Capture via a `tcpdump` child process printing link-level headers.
pub struct TcpdumpCapture {
    bin: String,
    interface: String,
}

impl TcpdumpCapture {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            bin: "tcpdump".to_string(),
            interface: interface.into(),
        }
    }

    #[must_use]
    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    fn args<'a>(&'a self, filter: &'a str) -> [&'a str; 7] {
        ["-i", self.interface.as_str(), "-l", "-e", "-n", "-q", filter]
    }
}

impl PacketCapture for TcpdumpCapture {
    fn run(
        &self,
        filter: &str,
        sink: &mut dyn FnMut(MacAddress, DateTime<Utc>),
    ) -> Result<(), NetError> {
        let mut child = Command::new(&self.bin)
            .args(self.args(filter))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!("packet capture running on {}", self.interface);

        if let Some(stdout) = child.stdout.take() {
            // Lines are decoded lossily; SSIDs and vendor fields are not UTF-8.
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        for mac in extract_macs(&String::from_utf8_lossy(&buf)) {
                            sink(mac, Utc::now());
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e.into());
                    }
                }
            }
        }

        let status = child.wait()?;
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        Err(NetError::CaptureEnded(format!(
            "{} exited with {status}: {}",
            self.bin,
            stderr.trim()
        )))
    }
}

/// Every distinct MAC-shaped token in a tcpdump line.
///
/// Tokens may carry a field label such as `SA:` or `BSSID:`.
pub fn extract_macs(line: &str) -> Vec<MacAddress> {
    let mut found: Vec<MacAddress> = Vec::new();
    for token in line.split(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')' | '>')) {
        let Some(start) = token.len().checked_sub(17) else {
            continue;
        };
        if start > 0 && token.as_bytes()[start - 1] != b':' {
            continue;
        }
        let Some(candidate) = token.get(start..) else {
            continue;
        };
        if let Ok(mac) = candidate.parse::<MacAddress>()
            && !found.contains(&mac)
        {
            found.push(mac);
        }
    }
    found
}

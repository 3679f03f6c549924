//! pisentry-net: wireless and network IO boundary.
//! Builds the passive capture filter, inspects interfaces, runs the packet
//! capture and the active ARP probe. No alarm logic lives here.

pub mod error;
pub mod filter;
pub mod interface;
pub mod probe;
pub mod sniffer;

pub use error::NetError;
pub use filter::build_capture_filter;
pub use interface::{InterfaceInspector, Ipv4Network, NetworkContext};
pub use probe::{ActiveProbe, ArpScanProbe, ProbeReply};
pub use sniffer::{PacketCapture, TcpdumpCapture, extract_macs};

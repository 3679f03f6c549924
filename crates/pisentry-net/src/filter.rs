//! Capture filter for trusted-device traffic.

use pisentry_core::MacAddress;

/// Build the pcap filter matching frames from trusted devices.
///
/// Two kinds of frames count as a sighting:
/// - probe requests where a trusted MAC is the transmitter (`addr2`) or
///   BSSID (`addr3`);
/// - frames addressed to this node (`addr1`) that carry a trusted MAC in
///   `addr3`.
pub fn build_capture_filter(trusted: &[MacAddress], own: &MacAddress) -> String {
    let macs = trusted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "((wlan addr2 ({macs}) or wlan addr3 ({macs})) and type mgt subtype probe-req) \
         or (wlan addr1 {own} and wlan addr3 ({macs}))"
    )
}

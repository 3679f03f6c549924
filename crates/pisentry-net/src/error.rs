//! Error types for the network boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("interface {0} does not exist")]
    InterfaceNotFound(String),

    #[error("unable to get MAC address for interface {interface}: {detail}")]
    MacUnavailable { interface: String, detail: String },

    #[error("unable to get network address for interface {0}")]
    NoNetworkAddress(String),

    #[error("packet capture ended: {0}")]
    CaptureEnded(String),

    #[error("network io error: {0}")]
    Io(#[from] std::io::Error),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("unknown capture mode: {0}")]
    InvalidCaptureMode(String),
}

// ─── MAC Address ──────────────────────────────────────────────────

/// 48-bit hardware address of a wireless device.
///
/// Parsed case-insensitively from `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`,
/// always rendered lowercase with colons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || CoreError::InvalidMac(trimmed.to_string());

        let parts: Vec<&str> = trimmed.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Alarm State ──────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    /// Off by operator command, regardless of presence.
    #[default]
    Disabled,
    /// Off because a trusted device is nearby.
    Disarmed,
    /// Watching for motion.
    Armed,
    /// A confirmed capture is being delivered.
    Triggered,
}

impl AlarmState {
    pub const ALL: [Self; 4] = [Self::Disabled, Self::Disarmed, Self::Armed, Self::Triggered];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Disarmed => "disarmed",
            Self::Armed => "armed",
            Self::Triggered => "triggered",
        }
    }

    /// Armed or Triggered: captures may still be forwarded.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Armed | Self::Triggered)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Capture ──────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Photo,
    #[default]
    Gif,
}

impl CaptureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Gif => "gif",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(Self::Photo),
            "gif" => Ok(Self::Gif),
            _ => Err(CoreError::InvalidCaptureMode(s.to_string())),
        }
    }
}

/// What the camera is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub requested_at: DateTime<Utc>,
    pub mode: CaptureMode,
    /// Photo mode: number of stills. Gif mode: capture length in seconds.
    pub count: u32,
}

/// Files produced by one capture, owned by the pipeline until forwarded or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArtifact {
    pub paths: Vec<PathBuf>,
    pub captured_at: DateTime<Utc>,
    pub mode: CaptureMode,
    /// Set once active confirmation found no trusted device nearby.
    pub confirmed: bool,
}

impl CaptureArtifact {
    pub fn new(paths: Vec<PathBuf>, captured_at: DateTime<Utc>, mode: CaptureMode) -> Self {
        Self {
            paths,
            captured_at,
            mode,
            confirmed: false,
        }
    }
}

// ─── Operator Commands ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorCommand {
    Help,
    Status,
    Enable,
    Disable,
    Photo,
    Gif,
}

impl OperatorCommand {
    /// Parse a chat message like `/status` or `/photo@my_bot now`.
    ///
    /// Returns `None` for anything that is not one of the known commands.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "help" | "start" => Some(Self::Help),
            "status" => Some(Self::Status),
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            "photo" => Some(Self::Photo),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub const HELP_TEXT: &'static str = "/status: Request status\n\
        /disable: Disable alarm\n\
        /enable: Enable alarm\n\
        /photo: Take a photo\n\
        /gif: Take a gif";
}

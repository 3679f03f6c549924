//! TOML configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use pisentry_core::{CaptureMode, MacAddress, MotionThresholds};

use crate::camera::CommandCameraConfig;
use crate::presence::ConfirmPolicy;
use crate::supervisor::CaptureSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    #[error("mac_addresses must list at least one trusted device")]
    NoMacAddresses,

    #[error("telegram.bot_token is empty")]
    MissingBotToken,

    #[error("invalid size {0:?}, expected WIDTHxHEIGHT")]
    InvalidSize(String),

    #[error("camera.{0} is empty")]
    EmptyCommand(&'static str),

    #[error("camera.capture_length must be at least 1")]
    ZeroCaptureLength,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mac_addresses: Vec<String>,
    #[serde(default = "default_network_interface")]
    pub network_interface: String,
    #[serde(default = "default_packet_timeout_secs")]
    pub packet_timeout_secs: u64,
    #[serde(default)]
    pub debug_mode: bool,
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: CaptureMode,
    pub capture_length: u32,
    pub save_path: PathBuf,
    pub photo_size: String,
    pub gif_size: String,
    pub photo_command: Vec<String>,
    pub gif_command: Vec<String>,
    pub motion_command: Vec<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect();
        Self {
            mode: CaptureMode::Gif,
            capture_length: 3,
            save_path: PathBuf::from("/var/tmp"),
            photo_size: "1024x768".to_string(),
            gif_size: "1024x768".to_string(),
            photo_command: argv(&[
                "rpicam-still", "-n", "--width", "{width}", "--height", "{height}", "-o", "{path}",
            ]),
            gif_command: argv(&[
                "pisentry-gif", "--seconds", "{count}", "--size", "{width}x{height}", "{path}",
            ]),
            motion_command: argv(&["pisentry-motion"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub magnitude: u8,
    pub vectors: usize,
    pub settle_secs: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        let thresholds = MotionThresholds::default();
        Self {
            magnitude: thresholds.magnitude,
            vectors: thresholds.vectors,
            settle_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub attempts: u32,
    pub timeout_ms: u64,
    pub spacing_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            timeout_ms: 1_000,
            spacing_secs: 2,
        }
    }
}

fn default_network_interface() -> String {
    "mon0".to_string()
}

fn default_packet_timeout_secs() -> u64 {
    700
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.trusted_macs()?;
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingBotToken);
        }
        parse_size(&self.camera.photo_size)?;
        parse_size(&self.camera.gif_size)?;
        for (name, command) in [
            ("photo_command", &self.camera.photo_command),
            ("gif_command", &self.camera.gif_command),
            ("motion_command", &self.camera.motion_command),
        ] {
            if command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(ConfigError::EmptyCommand(name));
            }
        }
        if self.camera.capture_length == 0 {
            return Err(ConfigError::ZeroCaptureLength);
        }
        Ok(())
    }

    pub fn trusted_macs(&self) -> Result<Vec<MacAddress>, ConfigError> {
        if self.mac_addresses.is_empty() {
            return Err(ConfigError::NoMacAddresses);
        }
        self.mac_addresses
            .iter()
            .map(|s| s.parse().map_err(|_| ConfigError::InvalidMac(s.clone())))
            .collect()
    }

    pub fn packet_timeout(&self) -> Duration {
        Duration::from_secs(self.packet_timeout_secs)
    }

    pub fn confirm_policy(&self) -> ConfirmPolicy {
        ConfirmPolicy {
            attempts: self.probe.attempts.max(1),
            probe_timeout: Duration::from_millis(self.probe.timeout_ms),
            spacing: Duration::from_secs(self.probe.spacing_secs),
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            mode: self.camera.mode,
            count: self.camera.capture_length,
            settle: Duration::from_secs(self.motion.settle_secs),
        }
    }

    pub fn camera_config(&self) -> Result<CommandCameraConfig, ConfigError> {
        Ok(CommandCameraConfig {
            save_path: self.camera.save_path.clone(),
            photo_size: parse_size(&self.camera.photo_size)?,
            gif_size: parse_size(&self.camera.gif_size)?,
            photo_command: self.camera.photo_command.clone(),
            gif_command: self.camera.gif_command.clone(),
            motion_command: self.camera.motion_command.clone(),
            thresholds: MotionThresholds {
                magnitude: self.motion.magnitude,
                vectors: self.motion.vectors,
            },
        })
    }
}

/// Parse `"1024x768"` into `(1024, 768)`.
pub fn parse_size(s: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let w: u32 = w.parse().map_err(|_| invalid())?;
    let h: u32 = h.parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

//! Global vmbundle configuration.
//!
//! Settings are read from `<config dir>/vmbundle/config.toml`. Every key is
//! optional:
//!
//! ```toml
//! default_bundle = "/Users/me/VM.bundle"
//! engine_socket = "/tmp/vmbundle/engine.sock"
//! cpus = 4
//! memory_mib = 8192
//! audio_input = false
//! operation_timeout = "5m"
//! start_attempts = 3
//!
//! [display]
//! width = 2560
//! height = 1600
//! pixels_per_inch = 144
//! ```

use crate::error::{Error, Result};
use crate::machine::{DevicePolicy, DisplayGeometry, SizingPolicy};
use crate::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "vmbundle";

/// Config file name inside the application config directory.
const CONFIG_FILENAME: &str = "config.toml";

/// Global vmbundle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VmbundleConfig {
    /// Configuration format version.
    pub version: u8,

    /// Bundle used when none is given on the command line.
    pub default_bundle: Option<PathBuf>,

    /// Engine control socket.
    pub engine_socket: Option<PathBuf>,

    /// Fixed vCPU count instead of the host-derived default.
    pub cpus: Option<u32>,

    /// Fixed memory size in MiB instead of the host-derived default.
    pub memory_mib: Option<u64>,

    /// Attach the host's audio input to the guest.
    pub audio_input: bool,

    /// Guest display geometry.
    pub display: DisplayConfig,

    /// Per-operation timeout as a human readable duration ("90s", "5m").
    /// Unset means lifecycle operations may take as long as they need.
    pub operation_timeout: Option<String>,

    /// How many times a cold start is attempted before giving up.
    pub start_attempts: u32,
}

impl Default for VmbundleConfig {
    fn default() -> Self {
        Self {
            version: 1,
            default_bundle: None,
            engine_socket: None,
            cpus: None,
            memory_mib: None,
            audio_input: true,
            display: DisplayConfig::default(),
            operation_timeout: None,
            start_attempts: 1,
        }
    }
}

/// Display geometry settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel density.
    pub pixels_per_inch: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let geometry = DisplayGeometry::default();
        Self {
            width: geometry.width_pixels,
            height: geometry.height_pixels,
            pixels_per_inch: geometry.pixels_per_inch,
        }
    }
}

impl VmbundleConfig {
    /// Location of the configuration file, if the platform has a config dir.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILENAME))
    }

    /// Load configuration from disk.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", path.display(), e))),
        };
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.start_attempts == 0 {
            return Err(Error::Config("start_attempts must be at least 1".into()));
        }
        self.operation_timeout()?;
        self.sizing_policy()?;
        Ok(())
    }

    /// Parsed per-operation timeout.
    pub fn operation_timeout(&self) -> Result<Option<Duration>> {
        self.operation_timeout
            .as_deref()
            .map(|text| {
                humantime::parse_duration(text).map_err(|e| {
                    Error::Config(format!("invalid operation_timeout '{}': {}", text, e))
                })
            })
            .transpose()
    }

    /// Engine control socket, falling back to the per-user runtime directory.
    pub fn engine_socket_path(&self) -> PathBuf {
        if let Some(path) = &self.engine_socket {
            return path.clone();
        }
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        runtime_dir
            .join(APP_NAME)
            .join(vmbundle_protocol::sockets::ENGINE_SOCKET)
    }

    /// CPU and memory sizing derived from these settings.
    pub fn sizing_policy(&self) -> Result<SizingPolicy> {
        let memory_bytes = self
            .memory_mib
            .map(|mib| {
                mib.checked_mul(1024 * 1024).ok_or_else(|| {
                    Error::Config(format!("memory_mib {} is too large", mib))
                })
            })
            .transpose()?;
        Ok(SizingPolicy {
            cpus: self.cpus,
            memory_bytes,
        })
    }

    /// Device list policy derived from these settings.
    pub fn device_policy(&self) -> DevicePolicy {
        DevicePolicy {
            display: DisplayGeometry {
                width_pixels: self.display.width,
                height_pixels: self.display.height,
                pixels_per_inch: self.display.pixels_per_inch,
            },
            audio_input: self.audio_input,
        }
    }

    /// Lifecycle controller options derived from these settings.
    pub fn session_options(&self) -> Result<SessionOptions> {
        self.validate()?;
        Ok(SessionOptions {
            sizing: self.sizing_policy()?,
            devices: self.device_policy(),
            operation_timeout: self.operation_timeout()?,
            start_attempts: self.start_attempts,
            ..SessionOptions::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = VmbundleConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, VmbundleConfig::default());
        assert_eq!(config.operation_timeout().unwrap(), None);
        assert_eq!(config.start_attempts, 1);
    }

    #[test]
    fn test_parse_full_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_bundle = "/vms/Work.bundle"
cpus = 4
memory_mib = 8192
audio_input = false
operation_timeout = "5m"
start_attempts = 3

[display]
width = 2560
height = 1600
"#,
        )
        .unwrap();

        let config = VmbundleConfig::load_from(&path).unwrap();
        assert_eq!(config.default_bundle, Some(PathBuf::from("/vms/Work.bundle")));
        assert_eq!(config.operation_timeout().unwrap(), Some(Duration::from_secs(300)));
        assert_eq!(config.display.pixels_per_inch, 80);

        let sizing = config.sizing_policy().unwrap();
        assert_eq!(sizing.cpus, Some(4));
        assert_eq!(sizing.memory_bytes, Some(8192 * 1024 * 1024));

        let devices = config.device_policy();
        assert!(!devices.audio_input);
        assert_eq!(devices.display.width_pixels, 2560);
    }

    #[test]
    fn test_oversized_memory_rejected() {
        let config = VmbundleConfig {
            memory_mib: Some(u64::MAX / 1024),
            ..Default::default()
        };
        assert!(matches!(config.sizing_policy(), Err(Error::Config(_))));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(config.session_options().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = VmbundleConfig {
            operation_timeout: Some("soon".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = VmbundleConfig {
            start_attempts: 0,
            ..Default::default()
        };
        assert!(config.session_options().is_err());
    }

    #[test]
    fn test_engine_socket_override() {
        let config = VmbundleConfig {
            engine_socket: Some(PathBuf::from("/run/engine.sock")),
            ..Default::default()
        };
        assert_eq!(config.engine_socket_path(), PathBuf::from("/run/engine.sock"));

        let default = VmbundleConfig::default().engine_socket_path();
        assert!(default.ends_with("vmbundle/engine.sock"));
    }
}

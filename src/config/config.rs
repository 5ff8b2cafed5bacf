use crate::collectors::command::MAX_COMMAND_TIMEOUT;
use crate::collectors::nvme::DEFAULT_DISKSTATS_PATH;
use crate::collectors::DeviceKind;
use crate::enumerator::DeviceSelection;
use crate::error::ConfigError;
use log::{info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on a single external command, in seconds
pub const MAX_TIMEOUT_SECONDS: u64 = MAX_COMMAND_TIMEOUT.as_secs();

/// Device list value meaning "ask the listing tool"
const AUTO_DEVICES: &str = "auto";

/// How the encoded artifact reaches its consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Atomically rewritten `.prom` file for node_exporter's textfile collector
    File,
    /// HTTP `GET /metrics`
    Serve,
}

/// Exporter configuration
///
/// Loaded from an optional TOML file; every key is optional and falls back to
/// the defaults below. Command-line flags and environment variables are
/// applied on top by the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub exporter: DeviceKind,
    /// `None` picks the kind's natural mode
    pub mode: Option<PublishMode>,
    pub output_dir: PathBuf,
    /// `None` picks `<kind>_metrics.prom`
    pub output_file: Option<String>,
    pub interval_seconds: u64,
    /// Empty (or `["auto"]`) means auto-detect on every cycle
    pub devices: Vec<String>,
    pub listen: SocketAddr,
    pub timeout_seconds: u64,
    pub diskstats_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exporter: DeviceKind::Nvme,
            mode: None,
            output_dir: PathBuf::from("/var/lib/node_exporter"),
            output_file: None,
            interval_seconds: 30,
            devices: Vec::new(),
            listen: SocketAddr::from(([0, 0, 0, 0], 9445)),
            timeout_seconds: MAX_TIMEOUT_SECONDS,
            diskstats_path: PathBuf::from(DEFAULT_DISKSTATS_PATH),
        }
    }
}

impl Config {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration, tolerating a missing file
    ///
    /// A file that exists but cannot be parsed is an error; a file that is
    /// absent is reported and the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if !path.exists() => {
                warn!(
                    "Configuration file '{}' not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::from_file(path)
            }
            None => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Check every value that would otherwise fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "interval_seconds must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(ConfigError::ValidationError(format!(
                "timeout_seconds must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECONDS, self.timeout_seconds
            )));
        }

        if let Some(name) = &self.output_file {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::ValidationError(format!(
                    "output_file must be a plain file name, got '{}'",
                    name
                )));
            }
        }

        if let DeviceSelection::Fixed(devices) = self.device_selection() {
            if devices.iter().any(|d| d.eq_ignore_ascii_case(AUTO_DEVICES)) {
                return Err(ConfigError::ValidationError(format!(
                    "'{}' cannot be combined with explicit devices",
                    AUTO_DEVICES
                )));
            }
            for device in &devices {
                self.validate_device(device)?;
            }
        }

        Ok(())
    }

    fn validate_device(&self, device: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::ValidationError(format!(
                "invalid device '{}': {}",
                device, reason
            )))
        };

        if device.is_empty() {
            return invalid("empty name");
        }
        if device.contains('/') || device == "." || device == ".." {
            return invalid("expected a device name, not a path");
        }
        if device.chars().any(char::is_whitespace) {
            return invalid("contains whitespace");
        }
        if self.exporter == DeviceKind::Gpu && !device.chars().all(|c| c.is_ascii_digit()) {
            return invalid("GPU devices are numeric indexes");
        }
        Ok(())
    }

    pub fn device_selection(&self) -> DeviceSelection {
        let auto = self.devices.is_empty()
            || (self.devices.len() == 1 && self.devices[0].eq_ignore_ascii_case(AUTO_DEVICES));
        if auto {
            DeviceSelection::Auto
        } else {
            DeviceSelection::Fixed(self.devices.clone())
        }
    }

    /// NVMe defaults to the textfile collector, GPUs to HTTP
    pub fn publish_mode(&self) -> PublishMode {
        self.mode.unwrap_or(match self.exporter {
            DeviceKind::Nvme => PublishMode::File,
            DeviceKind::Gpu => PublishMode::Serve,
        })
    }

    pub fn output_path(&self) -> PathBuf {
        let name = self
            .output_file
            .as_deref()
            .unwrap_or_else(|| self.exporter.default_file_name());
        self.output_dir.join(name)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

//! Helper configuration management
//!
//! The helper runs without a config file in the common case. When one is
//! present it is TOML:
//!
//! ```toml
//! [helper]
//! log_level = "debug"
//!
//! [devices]
//! host_root = "/dev"
//! container_root = "/var/lib/lxc-hotplug/usb"
//!
//! [attach]
//! program = "lxc-device"
//!
//! [report]
//! linger_ms = 10000
//! syslog = true
//! ```

use anyhow::{Context, Result, anyhow};
use common::DEFAULT_SYSLOG_SOCKET;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DEFAULT_CONTAINER_DEVICE_ROOT;

/// Upper bound accepted for `report.linger_ms`
pub const MAX_LINGER_MS: u64 = 60_000;

/// System-wide configuration file, consulted after the per-user one
pub const SYSTEM_CONFIG_PATH: &str = "/etc/lxc-hotplug/helper.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelperConfig {
    #[serde(default)]
    pub helper: HelperSettings,
    #[serde(default)]
    pub devices: DeviceSettings,
    #[serde(default)]
    pub attach: AttachSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperSettings {
    #[serde(default = "HelperSettings::default_log_level")]
    pub log_level: String,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl HelperSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Where device nodes live on the host and inside the container tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_host_root")]
    pub host_root: PathBuf,
    /// Isolated USB tree bind-mounted into containers
    #[serde(default = "DeviceSettings::default_container_root")]
    pub container_root: PathBuf,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host_root: Self::default_host_root(),
            container_root: Self::default_container_root(),
        }
    }
}

impl DeviceSettings {
    fn default_host_root() -> PathBuf {
        PathBuf::from("/dev")
    }

    fn default_container_root() -> PathBuf {
        PathBuf::from(DEFAULT_CONTAINER_DEVICE_ROOT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachSettings {
    /// Runtime device-attach program
    #[serde(default = "AttachSettings::default_program")]
    pub program: String,
    /// Arguments placed before `-n <container> add <path>`
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Vec::new(),
        }
    }
}

impl AttachSettings {
    fn default_program() -> String {
        "lxc-device".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Bound on the shutdown drain, in milliseconds
    #[serde(default = "ReportSettings::default_linger_ms")]
    pub linger_ms: u64,
    /// Mirror status lines to the local syslog socket
    #[serde(default = "ReportSettings::default_syslog")]
    pub syslog: bool,
    #[serde(default = "ReportSettings::default_syslog_socket")]
    pub syslog_socket: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            linger_ms: Self::default_linger_ms(),
            syslog: Self::default_syslog(),
            syslog_socket: Self::default_syslog_socket(),
        }
    }
}

impl ReportSettings {
    fn default_linger_ms() -> u64 {
        10_000
    }

    fn default_syslog() -> bool {
        true
    }

    fn default_syslog_socket() -> PathBuf {
        PathBuf::from(DEFAULT_SYSLOG_SOCKET)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

impl HelperConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    ///
    /// An explicit path must exist. With no explicit path and no file in
    /// any standard location the built-in defaults are returned.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let candidates = [Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)];
                match candidates.into_iter().find(|p| p.exists()) {
                    Some(p) => p,
                    None => {
                        tracing::debug!("No configuration file found, using defaults");
                        return Ok(Self::default());
                    }
                }
            }
        };

        Self::load_from(&config_path)
    }

    /// Load and validate a specific configuration file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HelperConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::debug!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Per-user configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("lxc-hotplug").join("helper.toml")
        } else {
            PathBuf::from(".config/lxc-hotplug/helper.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_log_level(&self.helper.log_level)?;

        for (name, root) in [
            ("devices.host_root", &self.devices.host_root),
            ("devices.container_root", &self.devices.container_root),
        ] {
            if !root.is_absolute() {
                return Err(anyhow!(
                    "{} must be an absolute path, got '{}'",
                    name,
                    root.display()
                ));
            }
        }

        if self.attach.program.trim().is_empty() {
            return Err(anyhow!("attach.program must not be empty"));
        }

        if self.report.linger_ms == 0 || self.report.linger_ms > MAX_LINGER_MS {
            return Err(anyhow!(
                "report.linger_ms must be between 1 and {}, got {}",
                MAX_LINGER_MS,
                self.report.linger_ms
            ));
        }

        Ok(())
    }
}

/// Check a log level name against the levels `tracing` understands
pub fn validate_log_level(level: &str) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&level) {
        return Err(anyhow!(
            "Invalid log level '{}', must be one of: {}",
            level,
            valid_levels.join(", ")
        ));
    }
    Ok(())
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

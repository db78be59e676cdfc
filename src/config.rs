//! Configuration management for hotspotd
//!
//! Two files: the hotspot record written by `hotspotd configure`, and optional
//! runtime settings (paths, timeouts, settle delays) that default when absent.

use crate::error::{HotspotError, HotspotResult};
use crate::probe::BINARY_DIRS;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the hotspot record
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hotspotd/hotspotd.toml";

/// Default location of the runtime settings
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/hotspotd/runtime.toml";

pub const DEFAULT_AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 45, 1);
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const DEFAULT_HARDWARE_ADDRESS: &str = "00:de:ad:be:ef:00";
pub const DEFAULT_SSID: &str = "hotspotd";
pub const DEFAULT_PASSWORD: &str = "12345678";

/// One hotspot instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotConfig {
    /// Wireless interface operated as access point
    #[serde(alias = "wlan")]
    pub wlan_interface: String,
    /// Interface with internet connectivity, NAT egress
    #[serde(alias = "inet")]
    pub uplink_interface: String,
    #[serde(alias = "ip")]
    pub ap_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Assigned to the wireless interface before bring-up
    #[serde(alias = "mac")]
    pub hardware_address: String,
    pub ssid: String,
    /// WPA passphrase, 8 characters minimum
    pub password: String,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            wlan_interface: String::new(),
            uplink_interface: String::new(),
            ap_address: DEFAULT_AP_ADDRESS,
            netmask: DEFAULT_NETMASK,
            hardware_address: DEFAULT_HARDWARE_ADDRESS.to_string(),
            ssid: DEFAULT_SSID.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl HotspotConfig {
    /// Check every field and canonicalize the MAC address
    ///
    /// Interface existence is not checked here; that needs a live system.
    pub fn validate(&mut self) -> HotspotResult<()> {
        validation::validate_interface_name(&self.wlan_interface)?;
        validation::validate_interface_name(&self.uplink_interface)?;
        if self.wlan_interface == self.uplink_interface {
            return Err(HotspotError::InvalidParameter(
                "Wireless and uplink interface must differ".to_string()
            ));
        }
        validation::netmask_prefix_len(self.netmask)?;
        self.hardware_address = validation::normalize_mac_address(&self.hardware_address)?;
        validation::validate_ssid(&self.ssid)?;
        validation::validate_wifi_password(&self.password)?;
        Ok(())
    }

    /// Prefix length of the configured netmask
    pub fn prefix_len(&self) -> HotspotResult<u8> {
        validation::netmask_prefix_len(self.netmask)
    }
}

/// Reads and writes the hotspot record
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `config`, replacing any existing file
    ///
    /// The file holds the passphrase and is created mode 0600.
    pub fn save(&self, config: &HotspotConfig) -> HotspotResult<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| HotspotError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    HotspotError::ConfigError(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        std::fs::write(&self.path, content)
            .map_err(|e| HotspotError::ConfigError(format!("Failed to write config: {}", e)))?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| HotspotError::ConfigError(format!("Failed to restrict config: {}", e)))?;

        Ok(())
    }

    /// Load and validate the record
    ///
    /// A missing file is `ConfigNotFound`; anything unreadable, incomplete or
    /// invalid is `ConfigParse`. No partial record is ever returned.
    pub fn load(&self) -> HotspotResult<HotspotConfig> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(HotspotError::ConfigNotFound(self.path.clone()))
            }
            Err(e) => {
                return Err(HotspotError::ConfigParse(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut config: HotspotConfig = toml::from_str(&content)?;
        config
            .validate()
            .map_err(|e| HotspotError::ConfigParse(format!("{}: {}", self.path.display(), e)))?;
        Ok(config)
    }
}

/// Paths and timing used by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Generated hostapd config, pid files and state file live here
    pub state_dir: PathBuf,
    /// hostapd template; the built-in one when unset
    pub template_path: Option<PathBuf>,
    /// Bound on every synchronous external command
    pub command_timeout_secs: u64,
    /// Pause after releasing the radio
    pub radio_settle_ms: u64,
    /// Upper bound for the interface to report up
    pub interface_settle_ms: u64,
    /// Pause before launching hostapd
    pub daemon_settle_ms: u64,
    /// Poll interval while waiting for readiness
    pub readiness_poll_ms: u64,
    /// Search path for required executables
    pub binary_dirs: Vec<PathBuf>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/run/hotspotd"),
            template_path: None,
            command_timeout_secs: 30,
            radio_settle_ms: 1000,
            interface_settle_ms: 2000,
            daemon_settle_ms: 2000,
            readiness_poll_ms: 100,
            binary_dirs: BINARY_DIRS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl RuntimeSettings {
    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> HotspotResult<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                HotspotError::ConfigError(format!("Failed to parse {}: {}", path.as_ref().display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(HotspotError::ConfigError(format!("Failed to read settings: {}", e))),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn radio_settle(&self) -> Duration {
        Duration::from_millis(self.radio_settle_ms)
    }

    pub fn interface_settle(&self) -> Duration {
        Duration::from_millis(self.interface_settle_ms)
    }

    pub fn daemon_settle(&self) -> Duration {
        Duration::from_millis(self.daemon_settle_ms)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms.max(1))
    }
}

//! hostapd management for the access point
//!
//! The daemon configuration is produced from a text template with three
//! placeholder tokens, substituted verbatim.

use crate::config::HotspotConfig;
use crate::error::{HotspotError, HotspotResult};
use crate::runner::CommandSpec;
use crate::validation;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Process name used for discovery
pub const HOSTAPD: &str = "hostapd";

pub const PASSWORD_TOKEN: &str = "<PASS>";
pub const INTERFACE_TOKEN: &str = "<WIFI>";
pub const SSID_TOKEN: &str = "<SSID>";

const TOKENS: [&str; 3] = [PASSWORD_TOKEN, INTERFACE_TOKEN, SSID_TOKEN];

/// Template used when no template file is configured
pub const DEFAULT_TEMPLATE: &str = "\
interface=<WIFI>
driver=nl80211
ssid=<SSID>
hw_mode=g
channel=6
macaddr_acl=0
auth_algs=1
ignore_broadcast_ssid=0
wpa=2
wpa_passphrase=<PASS>
wpa_key_mgmt=WPA-PSK
wpa_pairwise=TKIP
rsn_pairwise=CCMP
";

/// hostapd controller
pub struct HostapdController {
    config_dir: PathBuf,
    template: String,
}

impl HostapdController {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Use `template` instead of the built-in one
    pub fn with_template(mut self, template: String) -> HotspotResult<Self> {
        for token in TOKENS {
            if !template.contains(token) {
                return Err(HotspotError::ConfigError(format!(
                    "hostapd template is missing the {} placeholder",
                    token
                )));
            }
        }
        self.template = template;
        Ok(self)
    }

    /// Read a template from disk
    pub async fn with_template_file(self, path: &Path) -> HotspotResult<Self> {
        let template = fs::read_to_string(path).await.map_err(|e| {
            HotspotError::ConfigError(format!("Failed to read template {}: {}", path.display(), e))
        })?;
        self.with_template(template)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("hostapd.conf")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config_dir.join("hostapd.pid")
    }

    /// Substitute the interface, SSID and password into the template
    pub fn render(&self, config: &HotspotConfig) -> HotspotResult<String> {
        let password = validation::sanitize_config_value(&config.password)?;
        let interface = validation::sanitize_config_value(&config.wlan_interface)?;
        let ssid = validation::sanitize_config_value(&config.ssid)?;

        Ok(substitute(&self.template, &[
            (PASSWORD_TOKEN, password.as_str()),
            (INTERFACE_TOKEN, interface.as_str()),
            (SSID_TOKEN, ssid.as_str()),
        ]))
    }

    /// Render and write the configuration, readable by root only
    pub async fn write_config(&self, config: &HotspotConfig) -> HotspotResult<PathBuf> {
        let conf_content = self.render(config)?;
        let conf_path = self.config_path();
        fs::create_dir_all(&self.config_dir).await?;
        fs::write(&conf_path, conf_content).await?;
        fs::set_permissions(&conf_path, std::fs::Permissions::from_mode(0o600)).await?;
        Ok(conf_path)
    }

    /// `hostapd -B -P <pidfile> <conf>`
    pub fn launch_command(&self, conf_path: &Path) -> CommandSpec {
        let pid_file = self.pid_file().to_string_lossy().into_owned();
        let conf = conf_path.to_string_lossy().into_owned();
        CommandSpec::new(HOSTAPD, &["-B", "-P", pid_file.as_str(), conf.as_str()])
    }
}

/// Replace every token occurrence in one left-to-right pass
///
/// Substituted text is never rescanned, so a value containing a token string
/// is written literally.
fn substitute(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    'scan: while !rest.is_empty() {
        if let Some(pos) = rest.find('<') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos..];
            for (token, value) in replacements {
                if rest.starts_with(token) {
                    out.push_str(value);
                    rest = &rest[token.len()..];
                    continue 'scan;
                }
            }
            out.push('<');
            rest = &rest[1..];
        } else {
            out.push_str(rest);
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> HotspotConfig {
        HotspotConfig {
            wlan_interface: "wlan0".to_string(),
            uplink_interface: "eth0".to_string(),
            ssid: "CoffeeShop".to_string(),
            password: "s3cretpass".to_string(),
            ..HotspotConfig::default()
        }
    }

    #[test]
    fn test_render_replaces_all_placeholders() {
        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"));
        let conf = controller.render(&config()).unwrap();

        assert!(conf.contains("interface=wlan0\n"));
        assert!(conf.contains("ssid=CoffeeShop\n"));
        assert!(conf.contains("wpa_passphrase=s3cretpass\n"));
        for token in TOKENS {
            assert!(!conf.contains(token), "{} left in output", token);
        }
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"));
        let mut cfg = config();
        cfg.ssid = "<PASS>".to_string();
        let conf = controller.render(&cfg).unwrap();
        assert!(conf.contains("ssid=<PASS>\n"));
        assert!(conf.contains("wpa_passphrase=s3cretpass\n"));
    }

    #[test]
    fn test_render_rejects_line_breaks() {
        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"));
        let mut cfg = config();
        cfg.ssid = "evil\nwpa=0".to_string();
        assert!(controller.render(&cfg).is_err());
    }

    #[test]
    fn test_custom_template_requires_tokens() {
        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"));
        assert!(controller.with_template("interface=<WIFI>\nssid=<SSID>\n".to_string()).is_err());

        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"))
            .with_template("interface=<WIFI>\nssid=<SSID>\nwpa_passphrase=<PASS>\nchannel=11\n".to_string())
            .unwrap();
        let conf = controller.render(&config()).unwrap();
        assert_eq!(conf, "interface=wlan0\nssid=CoffeeShop\nwpa_passphrase=s3cretpass\nchannel=11\n");
    }

    #[test]
    fn test_substitute_keeps_unrelated_angle_brackets() {
        assert_eq!(substitute("a<b <SSID>>", &[(SSID_TOKEN, "x")]), "a<b x>");
    }

    #[test]
    fn test_launch_command() {
        let controller = HostapdController::new(PathBuf::from("/run/hotspotd"));
        let cmd = controller.launch_command(&controller.config_path());
        assert_eq!(
            cmd.to_string(),
            "hostapd -B -P /run/hotspotd/hostapd.pid /run/hotspotd/hostapd.conf"
        );
    }

    #[tokio::test]
    async fn test_write_config_is_private() {
        let dir = TempDir::new().unwrap();
        let controller = HostapdController::new(dir.path().join("state"));
        let path = controller.write_config(&config()).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("ssid=CoffeeShop"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

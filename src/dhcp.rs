//! DHCP/DNS server management via dnsmasq

use crate::config::HotspotConfig;
use crate::error::HotspotResult;
use crate::runner::CommandSpec;
use crate::validation;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Process name used for discovery
pub const DNSMASQ: &str = "dnsmasq";

/// First and last host octet handed out to clients
pub const RANGE_FIRST_HOST: u8 = 20;
pub const RANGE_LAST_HOST: u8 = 100;

/// Lease time in dnsmasq notation
pub const LEASE_TIME: &str = "4h";

/// Address pool served on the access point subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub lease_time: String,
}

impl DhcpRange {
    /// Pool `.20`-`.100` on the first three octets of the AP address
    pub fn for_access_point(ap_address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let [a, b, c, _] = ap_address.octets();
        Self {
            start: Ipv4Addr::new(a, b, c, RANGE_FIRST_HOST),
            end: Ipv4Addr::new(a, b, c, RANGE_LAST_HOST),
            netmask,
            lease_time: LEASE_TIME.to_string(),
        }
    }
}

impl fmt::Display for DhcpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.start, self.end, self.netmask, self.lease_time)
    }
}

pub struct DhcpController {
    state_dir: PathBuf,
}

impl DhcpController {
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join("dnsmasq.pid")
    }

    /// Authoritative dnsmasq bound to the wireless interface
    pub fn launch_command(&self, config: &HotspotConfig) -> HotspotResult<CommandSpec> {
        validation::validate_interface_name(&config.wlan_interface)?;

        let range = DhcpRange::for_access_point(config.ap_address, config.netmask);
        let args = vec![
            "--dhcp-authoritative".to_string(),
            format!("--interface={}", config.wlan_interface),
            format!("--dhcp-range={}", range),
            format!("--pid-file={}", self.pid_file().display()),
        ];
        Ok(CommandSpec::new(DNSMASQ, &args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_from_ap_address() {
        let range = DhcpRange::for_access_point(
            Ipv4Addr::new(192, 168, 45, 1),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert_eq!(range.start, Ipv4Addr::new(192, 168, 45, 20));
        assert_eq!(range.end, Ipv4Addr::new(192, 168, 45, 100));
        assert_eq!(range.to_string(), "192.168.45.20,192.168.45.100,255.255.255.0,4h");
    }

    #[test]
    fn test_range_ignores_host_part() {
        let range = DhcpRange::for_access_point(
            Ipv4Addr::new(10, 0, 7, 254),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert_eq!(range.to_string(), "10.0.7.20,10.0.7.100,255.255.255.0,4h");
    }

    #[test]
    fn test_launch_command() {
        let controller = DhcpController::new(PathBuf::from("/run/hotspotd"));
        let config = HotspotConfig {
            wlan_interface: "wlan0".to_string(),
            uplink_interface: "eth0".to_string(),
            ..HotspotConfig::default()
        };
        let cmd = controller.launch_command(&config).unwrap();
        assert_eq!(
            cmd.to_string(),
            "dnsmasq --dhcp-authoritative --interface=wlan0 \
             --dhcp-range=192.168.45.20,192.168.45.100,255.255.255.0,4h \
             --pid-file=/run/hotspotd/dnsmasq.pid"
        );
    }

    #[test]
    fn test_launch_command_rejects_bad_interface() {
        let controller = DhcpController::new(PathBuf::from("/run/hotspotd"));
        let config = HotspotConfig {
            wlan_interface: "wlan0 --conf-file=/tmp/x".to_string(),
            ..HotspotConfig::default()
        };
        assert!(controller.launch_command(&config).is_err());
    }
}

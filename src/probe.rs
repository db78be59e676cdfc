//! Read-only system queries
//!
//! Interface enumeration comes from sysfs, routes and processes from procfs.
//! Nothing in here changes system state.

use crate::error::{HotspotError, HotspotResult};
use crate::runner::{CommandRunner, CommandSpec};
use crate::validation;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

const SYS_CLASS_NET: &str = "/sys/class/net";
const PROC_ROOT: &str = "/proc";

/// Directories searched by [`SystemProbe::find_executable`], in order
pub const BINARY_DIRS: &[&str] = &[
    "/usr/sbin",
    "/sbin",
    "/usr/local/sbin",
    "/usr/bin",
    "/bin",
    "/usr/local/bin",
];

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;
const IFF_UP: u32 = 0x0001;

/// An interface and its IPv4 address, if it has one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
}

pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
    sys_net: PathBuf,
    proc_root: PathBuf,
    binary_dirs: Vec<PathBuf>,
}

impl SystemProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_roots(runner, PathBuf::from(SYS_CLASS_NET), PathBuf::from(PROC_ROOT))
    }

    /// Probe against alternative sysfs/procfs roots
    pub fn with_roots(runner: Arc<dyn CommandRunner>, sys_net: PathBuf, proc_root: PathBuf) -> Self {
        Self {
            runner,
            sys_net,
            proc_root,
            binary_dirs: BINARY_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_binary_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.binary_dirs = dirs;
        self
    }

    /// All interface names known to the kernel, sorted
    pub async fn interface_names(&self) -> HotspotResult<Vec<String>> {
        if !self.sys_net.exists() {
            return Err(HotspotError::InterfaceNotFound(format!(
                "{} not available",
                self.sys_net.display()
            )));
        }

        let mut entries = fs::read_dir(&self.sys_net).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every interface together with its IPv4 address
    pub async fn list_interfaces(&self) -> HotspotResult<Vec<InterfaceRecord>> {
        let names = self.interface_names().await?;
        let addresses = self.ipv4_addresses().await;

        Ok(names
            .into_iter()
            .map(|name| {
                let ipv4 = addresses.get(&name).copied();
                InterfaceRecord { name, ipv4 }
            })
            .collect())
    }

    /// Interfaces with an 802.11 phy, sorted
    pub async fn wireless_interface_names(&self) -> HotspotResult<Vec<String>> {
        let names = self.interface_names().await?;
        let mut wireless = Vec::new();
        for name in names {
            if fs::metadata(self.sys_net.join(&name).join("phy80211")).await.is_ok() {
                wireless.push(name);
            }
        }
        Ok(wireless)
    }

    /// Interface carrying the default route
    pub async fn default_route_interface(&self) -> Option<String> {
        let table = fs::read_to_string(self.proc_root.join("net/route")).await.ok()?;
        parse_default_route(&table)
    }

    /// First wireless interface without an IPv4 address
    ///
    /// An addressed interface is assumed to be in use already. With several
    /// idle radios this simply picks the first by name.
    pub async fn auto_detect_wifi_interface(&self) -> Option<String> {
        let wireless = self.wireless_interface_names().await.ok()?;
        let addresses = self.ipv4_addresses().await;
        wireless.into_iter().find(|name| !addresses.contains_key(name))
    }

    /// Current hardware address, lowercase
    pub async fn hardware_address(&self, interface: &str) -> Option<String> {
        validation::validate_interface_name(interface).ok()?;
        let raw = fs::read_to_string(self.sys_net.join(interface).join("address")).await.ok()?;
        validation::normalize_mac_address(raw.trim()).ok()
    }

    /// Whether the interface is administratively up; `None` if unknown
    pub async fn interface_is_up(&self, interface: &str) -> Option<bool> {
        validation::validate_interface_name(interface).ok()?;
        let raw = fs::read_to_string(self.sys_net.join(interface).join("flags")).await.ok()?;
        let flags = u32::from_str_radix(raw.trim().trim_start_matches("0x"), 16).ok()?;
        Some(flags & IFF_UP != 0)
    }

    /// PID of the first process whose name contains `name`
    ///
    /// Case-sensitive substring match on the command name; this process is
    /// never reported.
    pub async fn is_process_running(&self, name: &str) -> Option<u32> {
        self.find_processes(name).await.into_iter().next()
    }

    /// All PIDs whose command name contains `name`, ascending
    pub async fn find_processes(&self, name: &str) -> Vec<u32> {
        let own_pid = std::process::id();
        let mut pids = Vec::new();

        let mut entries = match fs::read_dir(&self.proc_root).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("cannot scan {}: {}", self.proc_root.display(), e);
                return pids;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let pid = match entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            if pid == own_pid {
                continue;
            }
            if let Some(comm) = self.process_name(pid).await {
                if comm.contains(name) {
                    pids.push(pid);
                }
            }
        }

        pids.sort_unstable();
        pids
    }

    /// Command name of a live process
    pub async fn process_name(&self, pid: u32) -> Option<String> {
        fs::read_to_string(self.proc_root.join(pid.to_string()).join("comm"))
            .await
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Search the binary directories for an executable file
    pub async fn find_executable(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.binary_dirs {
            let candidate = dir.join(name);
            if is_executable(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn ipv4_addresses(&self) -> HashMap<String, Ipv4Addr> {
        let cmd = CommandSpec::new("ip", &["-json", "-4", "addr", "show"]);
        match self.runner.run(&cmd).await {
            Ok(outcome) if outcome.is_success() => {
                parse_ip_addr_json(outcome.output()).unwrap_or_else(|e| {
                    debug!("cannot parse '{}' output: {}", cmd, e);
                    HashMap::new()
                })
            }
            Ok(outcome) => {
                debug!("'{}' did not succeed: {:?}", cmd, outcome);
                HashMap::new()
            }
            Err(e) => {
                debug!("'{}' failed: {}", cmd, e);
                HashMap::new()
            }
        }
    }
}

async fn is_executable(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Find the default-route interface in `/proc/net/route` text
///
/// The default route has destination `00000000` and both the up and gateway
/// flags set.
pub fn parse_default_route(table: &str) -> Option<String> {
    for line in table.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (iface, dest, flags) = (fields[0], fields[1], fields[3]);
        if dest != "00000000" {
            continue;
        }
        let flags = match u32::from_str_radix(flags, 16) {
            Ok(flags) => flags,
            Err(_) => continue,
        };
        if flags & RTF_UP != 0 && flags & RTF_GATEWAY != 0 {
            return Some(iface.to_string());
        }
    }
    None
}

/// First IPv4 address per interface from `ip -json addr show`
pub fn parse_ip_addr_json(json_str: &str) -> HotspotResult<HashMap<String, Ipv4Addr>> {
    let json: serde_json::Value = serde_json::from_str(json_str)?;
    let mut addresses = HashMap::new();

    if let Some(arr) = json.as_array() {
        for iface in arr {
            let name = match iface.get("ifname").and_then(|v| v.as_str()) {
                Some(name) => name,
                None => continue,
            };
            if let Some(addr_info) = iface.get("addr_info").and_then(|v| v.as_array()) {
                let first = addr_info.iter().find_map(|addr| {
                    if addr.get("family").and_then(|v| v.as_str()) != Some("inet") {
                        return None;
                    }
                    addr.get("local").and_then(|v| v.as_str())?.parse::<Ipv4Addr>().ok()
                });
                if let Some(ip) = first {
                    addresses.entry(name.to_string()).or_insert(ip);
                }
            }
        }
    }

    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutcome, MockCommandRunner};
    use std::fs as stdfs;
    use tempfile::TempDir;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t0000A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
eth0\t00000000\t0100A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
wlan1\t00000000\t0101A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
";

    const IP_JSON: &str = r#"[
        {"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8}]},
        {"ifindex":2,"ifname":"eth0","addr_info":[{"family":"inet","local":"192.168.0.10","prefixlen":24},{"family":"inet","local":"10.0.0.2","prefixlen":8}]},
        {"ifindex":3,"ifname":"wlan0","addr_info":[]}
    ]"#;

    fn runner_with_addresses(json: &'static str) -> Arc<dyn CommandRunner> {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.program == "ip")
            .returning(move |_| Ok(CommandOutcome::Success { output: json.to_string() }));
        Arc::new(runner)
    }

    fn fake_sysfs(dir: &Path, interfaces: &[(&str, bool, &str, &str)]) {
        for (name, wireless, mac, flags) in interfaces {
            let iface = dir.join(name);
            stdfs::create_dir_all(&iface).unwrap();
            stdfs::write(iface.join("address"), format!("{}\n", mac)).unwrap();
            stdfs::write(iface.join("flags"), format!("{}\n", flags)).unwrap();
            if *wireless {
                stdfs::create_dir_all(iface.join("phy80211")).unwrap();
            }
        }
    }

    fn fake_proc(dir: &Path, processes: &[(u32, &str)]) {
        for (pid, comm) in processes {
            let p = dir.join(pid.to_string());
            stdfs::create_dir_all(&p).unwrap();
            stdfs::write(p.join("comm"), format!("{}\n", comm)).unwrap();
        }
        stdfs::create_dir_all(dir.join("self")).unwrap();
        stdfs::create_dir_all(dir.join("net")).unwrap();
        stdfs::write(dir.join("net/route"), ROUTE_TABLE).unwrap();
    }

    fn probe(sys: &TempDir, proc_dir: &TempDir) -> SystemProbe {
        SystemProbe::with_roots(
            runner_with_addresses(IP_JSON),
            sys.path().to_path_buf(),
            proc_dir.path().to_path_buf(),
        )
    }

    #[test]
    fn test_parse_default_route() {
        assert_eq!(parse_default_route(ROUTE_TABLE), Some("eth0".to_string()));
        assert_eq!(parse_default_route("Iface\tDestination\n"), None);

        // Gateway flag missing
        let no_gw = "eth0\t00000000\t00000000\t0001\t0\t0\t0\t00000000\t0\t0\t0\n";
        assert_eq!(parse_default_route(no_gw), None);
    }

    #[test]
    fn test_parse_ip_addr_json() {
        let addrs = parse_ip_addr_json(IP_JSON).unwrap();
        assert_eq!(addrs.get("eth0"), Some(&Ipv4Addr::new(192, 168, 0, 10)));
        assert_eq!(addrs.get("lo"), Some(&Ipv4Addr::new(127, 0, 0, 1)));
        assert!(!addrs.contains_key("wlan0"));
        assert!(parse_ip_addr_json("not json").is_err());
    }

    #[tokio::test]
    async fn test_list_and_detect_interfaces() {
        let sys = TempDir::new().unwrap();
        let proc_dir = TempDir::new().unwrap();
        fake_sysfs(sys.path(), &[
            ("eth0", false, "52:54:00:12:34:56", "0x1003"),
            ("lo", false, "00:00:00:00:00:00", "0x9"),
            ("wlan0", true, "AA:BB:CC:DD:EE:FF", "0x1002"),
        ]);
        fake_proc(proc_dir.path(), &[]);
        let probe = probe(&sys, &proc_dir);

        let records = probe.list_interfaces().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], InterfaceRecord {
            name: "eth0".to_string(),
            ipv4: Some(Ipv4Addr::new(192, 168, 0, 10)),
        });
        assert_eq!(records[2].ipv4, None);

        assert_eq!(probe.wireless_interface_names().await.unwrap(), vec!["wlan0".to_string()]);
        assert_eq!(probe.auto_detect_wifi_interface().await, Some("wlan0".to_string()));
        assert_eq!(probe.default_route_interface().await, Some("eth0".to_string()));
        assert_eq!(probe.hardware_address("wlan0").await, Some("aa:bb:cc:dd:ee:ff".to_string()));
        assert_eq!(probe.hardware_address("wlan9").await, None);
        assert_eq!(probe.interface_is_up("eth0").await, Some(true));
        assert_eq!(probe.interface_is_up("wlan0").await, Some(false));
        assert_eq!(probe.interface_is_up("wlan9").await, None);
    }

    #[tokio::test]
    async fn test_auto_detect_skips_addressed_radio() {
        let sys = TempDir::new().unwrap();
        let proc_dir = TempDir::new().unwrap();
        fake_sysfs(sys.path(), &[("eth0", true, "52:54:00:12:34:56", "0x1003")]);
        fake_proc(proc_dir.path(), &[]);
        let probe = probe(&sys, &proc_dir);

        assert_eq!(probe.auto_detect_wifi_interface().await, None);
    }

    #[tokio::test]
    async fn test_process_lookup() {
        let sys = TempDir::new().unwrap();
        let proc_dir = TempDir::new().unwrap();
        fake_sysfs(sys.path(), &[]);
        fake_proc(proc_dir.path(), &[(412, "dnsmasq"), (97, "hostapd"), (98, "hostapd_cli")]);
        let probe = probe(&sys, &proc_dir);

        assert_eq!(probe.is_process_running("hostapd").await, Some(97));
        assert_eq!(probe.find_processes("hostapd").await, vec![97, 98]);
        assert_eq!(probe.is_process_running("dnsmasq").await, Some(412));
        assert_eq!(probe.is_process_running("Dnsmasq").await, None);
        assert_eq!(probe.is_process_running("wpa_supplicant").await, None);
        assert_eq!(probe.process_name(412).await, Some("dnsmasq".to_string()));
    }

    #[tokio::test]
    async fn test_own_process_is_excluded() {
        let sys = TempDir::new().unwrap();
        let proc_dir = TempDir::new().unwrap();
        fake_sysfs(sys.path(), &[]);
        fake_proc(proc_dir.path(), &[(std::process::id(), "hotspotd-probe")]);
        let probe = probe(&sys, &proc_dir);

        assert_eq!(probe.is_process_running("hotspotd-probe").await, None);
    }

    #[tokio::test]
    async fn test_find_executable() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let plain = first.path().join("hostapd");
        stdfs::write(&plain, "").unwrap();
        stdfs::set_permissions(&plain, stdfs::Permissions::from_mode(0o644)).unwrap();

        let exe = second.path().join("hostapd");
        stdfs::write(&exe, "#!/bin/sh\n").unwrap();
        stdfs::set_permissions(&exe, stdfs::Permissions::from_mode(0o755)).unwrap();

        let probe = SystemProbe::new(runner_with_addresses("[]"))
            .with_binary_dirs(vec![first.path().to_path_buf(), second.path().to_path_buf()]);

        assert_eq!(probe.find_executable("hostapd").await, Some(exe));
        assert_eq!(probe.find_executable("dnsmasq").await, None);
    }
}

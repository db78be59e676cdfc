//! The system state the hotspot lives in
//!
//! Interfaces, sysctl, netfilter and daemon processes are all external state.
//! [`HostAdapter`] is the narrow surface the controller sequences over;
//! [`LinuxHost`] implements it with ip, iptables, sysctl, kill, nmcli and
//! rfkill.

use crate::error::{HotspotError, HotspotResult};
use crate::firewall::{self, Chain, Policy, Rule};
use crate::probe::SystemProbe;
use crate::runner::{CommandOutcome, CommandRunner, CommandSpec, ProcessHandle};
use crate::sysctl;
use crate::validation;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on deleting duplicates of one rule
const MAX_RULE_COPIES: usize = 16;

/// Signal used to terminate a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful
    Term,
    /// Forceful
    Kill,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

#[async_trait]
pub trait HostAdapter: Send + Sync {
    /// Whether we run with administrative privilege
    fn is_privileged(&self) -> bool;

    /// Take WiFi away from NetworkManager and clear soft rfkill blocks
    async fn release_radio(&self) -> HotspotResult<()>;

    async fn interface_down(&self, interface: &str) -> HotspotResult<()>;

    /// Only succeeds on most drivers while the interface is down
    async fn set_hardware_address(&self, interface: &str, mac: &str) -> HotspotResult<()>;

    /// Assign `address/prefix_len` and bring the interface up
    async fn interface_up(&self, interface: &str, address: Ipv4Addr, prefix_len: u8) -> HotspotResult<()>;

    /// Administrative state, `None` when it cannot be observed
    async fn interface_is_up(&self, interface: &str) -> Option<bool>;

    async fn find_process_by_name(&self, name: &str) -> Option<u32>;

    /// Every matching PID, ascending
    async fn find_processes_by_name(&self, name: &str) -> Vec<u32>;

    /// Name of a live process, `None` once it is gone
    async fn process_name(&self, pid: u32) -> Option<String>;

    async fn terminate_process(&self, pid: u32, signal: Signal) -> HotspotResult<()>;

    async fn set_forwarding(&self, enabled: bool) -> HotspotResult<()>;

    async fn forwarding_enabled(&self) -> HotspotResult<bool>;

    async fn set_forward_policy(&self, policy: Policy) -> HotspotResult<()>;

    /// Flush the nat table and delete its custom chains
    async fn reset_nat(&self) -> HotspotResult<()>;

    /// Append `rule` unless it is already present
    async fn install_rule(&self, rule: &Rule) -> HotspotResult<()>;

    /// Delete every copy of `rule`; absent rules are not an error
    async fn remove_rule(&self, rule: &Rule) -> HotspotResult<()>;

    async fn spawn_daemon(&self, cmd: &CommandSpec) -> HotspotResult<ProcessHandle>;

    async fn sleep(&self, duration: Duration);
}

/// Linux implementation driven through a [`CommandRunner`]
pub struct LinuxHost {
    runner: Arc<dyn CommandRunner>,
    probe: SystemProbe,
}

impl LinuxHost {
    pub fn new(runner: Arc<dyn CommandRunner>, probe: SystemProbe) -> Self {
        Self { runner, probe }
    }

    async fn exec(&self, cmd: CommandSpec) -> HotspotResult<String> {
        self.runner.run(&cmd).await?.into_result(&cmd)
    }

    async fn run_ip(&self, args: &[&str]) -> HotspotResult<()> {
        self.exec(CommandSpec::new("ip", args)).await.map(|_| ())
    }

    async fn rule_present(&self, rule: &Rule) -> HotspotResult<bool> {
        let outcome = self.runner.run(&rule.check_command()).await?;
        if let CommandOutcome::SpawnFailed { reason } = &outcome {
            return Err(HotspotError::SpawnFailed {
                cmd: rule.check_command().to_string(),
                reason: reason.clone(),
            });
        }
        Ok(outcome.is_success())
    }
}

#[async_trait]
impl HostAdapter for LinuxHost {
    fn is_privileged(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    async fn release_radio(&self) -> HotspotResult<()> {
        let radio_off = CommandSpec::new("nmcli", &["radio", "wifi", "off"]);
        let outcome = self.runner.run(&radio_off).await?;
        if !outcome.is_success() || outcome.output().to_lowercase().contains("error") {
            // Pre-1.0 NetworkManager syntax
            let legacy = CommandSpec::new("nmcli", &["nm", "wifi", "off"]);
            let legacy_outcome = self.runner.run(&legacy).await?;
            debug!("'{}' -> {:?}", legacy, legacy_outcome);
        }

        self.exec(CommandSpec::new("rfkill", &["unblock", "wlan"])).await?;
        Ok(())
    }

    async fn interface_down(&self, interface: &str) -> HotspotResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["link", "set", "dev", interface, "down"]).await
    }

    async fn set_hardware_address(&self, interface: &str, mac: &str) -> HotspotResult<()> {
        validation::validate_interface_name(interface)?;
        let mac = validation::normalize_mac_address(mac)?;
        self.run_ip(&["link", "set", "dev", interface, "address", &mac]).await
    }

    async fn interface_up(&self, interface: &str, address: Ipv4Addr, prefix_len: u8) -> HotspotResult<()> {
        validation::validate_interface_name(interface)?;
        let addr = format!("{}/{}", address, prefix_len);

        self.run_ip(&["addr", "flush", "dev", interface]).await?;
        self.run_ip(&["addr", "add", &addr, "broadcast", "+", "dev", interface]).await?;
        self.run_ip(&["link", "set", "dev", interface, "up"]).await
    }

    async fn interface_is_up(&self, interface: &str) -> Option<bool> {
        self.probe.interface_is_up(interface).await
    }

    async fn find_process_by_name(&self, name: &str) -> Option<u32> {
        self.probe.is_process_running(name).await
    }

    async fn find_processes_by_name(&self, name: &str) -> Vec<u32> {
        self.probe.find_processes(name).await
    }

    async fn process_name(&self, pid: u32) -> Option<String> {
        self.probe.process_name(pid).await
    }

    async fn terminate_process(&self, pid: u32, signal: Signal) -> HotspotResult<()> {
        let sig = format!("-{}", signal.as_str());
        let pid = pid.to_string();
        self.exec(CommandSpec::new("kill", &[sig.as_str(), pid.as_str()])).await.map(|_| ())
    }

    async fn set_forwarding(&self, enabled: bool) -> HotspotResult<()> {
        let value = if enabled { "1" } else { "0" };
        sysctl::write_sysctl(self.runner.as_ref(), sysctl::IP_FORWARD, value).await
    }

    async fn forwarding_enabled(&self) -> HotspotResult<bool> {
        Ok(sysctl::read_sysctl(self.runner.as_ref(), sysctl::IP_FORWARD).await? == "1")
    }

    async fn set_forward_policy(&self, policy: Policy) -> HotspotResult<()> {
        self.exec(firewall::policy_command(Chain::Forward, policy)).await.map(|_| ())
    }

    async fn reset_nat(&self) -> HotspotResult<()> {
        let mut first_error = None;
        for cmd in firewall::nat_reset_commands() {
            if let Err(e) = self.exec(cmd).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn install_rule(&self, rule: &Rule) -> HotspotResult<()> {
        if self.rule_present(rule).await? {
            debug!("rule already present: {}", rule.check_command());
            return Ok(());
        }
        self.exec(rule.append_command()).await.map(|_| ())
    }

    async fn remove_rule(&self, rule: &Rule) -> HotspotResult<()> {
        for _ in 0..MAX_RULE_COPIES {
            if !self.rule_present(rule).await? {
                return Ok(());
            }
            self.exec(rule.delete_command()).await?;
        }
        warn!("giving up on duplicates of: {}", rule.delete_command());
        Ok(())
    }

    async fn spawn_daemon(&self, cmd: &CommandSpec) -> HotspotResult<ProcessHandle> {
        self.runner.spawn_detached(cmd).await
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

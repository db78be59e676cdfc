//! Hotspot start/stop orchestration
//!
//! `start` and `stop` are fixed, ordered sequences over a [`HostAdapter`].
//! Every step is attempted even if an earlier one failed; each outcome is
//! recorded in a [`SequenceReport`]. Only privilege and command timeouts abort
//! a sequence.
//!
//! Stopping the daemons prefers the PIDs recorded by the previous `start` and
//! falls back to matching by process name for instances we did not launch.

use crate::config::{HotspotConfig, RuntimeSettings};
use crate::dhcp::{DhcpController, DNSMASQ};
use crate::error::{HotspotError, HotspotResult};
use crate::firewall::{NatRules, Policy};
use crate::host::{HostAdapter, Signal};
use crate::hostapd::{HostapdController, HOSTAPD};
use crate::runner::CommandSpec;
use crate::state::{self, RuntimeState, StateFile};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Bound on lookup/terminate rounds in [`HotspotController::kill_all_by_name`]
const MAX_KILL_ROUNDS: usize = 32;

/// How long a signalled process gets to disappear
const EXIT_WAIT: Duration = Duration::from_secs(1);

/// The two supervised daemons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemon {
    Hostapd,
    Dnsmasq,
}

impl Daemon {
    pub fn process_name(&self) -> &'static str {
        match self {
            Daemon::Hostapd => HOSTAPD,
            Daemon::Dnsmasq => DNSMASQ,
        }
    }

    /// hostapd is killed outright, dnsmasq is asked to exit
    pub fn stop_signal(&self) -> Signal {
        match self {
            Daemon::Hostapd => Signal::Kill,
            Daemon::Dnsmasq => Signal::Term,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReleaseRadio,
    RenderApConfig,
    InterfaceDown,
    SetHardwareAddress,
    InterfaceUp,
    StopDaemon,
    EnableForwarding,
    DisableForwarding,
    ForwardPolicy,
    ResetNat,
    InstallRule,
    RemoveRule,
    LaunchDhcp,
    LaunchAp,
    RecordState,
    ClearState,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: Step,
    pub detail: String,
    pub error: Option<HotspotError>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a sequence did, in order
#[derive(Debug)]
pub struct SequenceReport {
    pub operation: &'static str,
    pub outcomes: Vec<StepOutcome>,
}

impl SequenceReport {
    fn new(operation: &'static str) -> Self {
        Self { operation, outcomes: Vec::new() }
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn contains(&self, step: Step) -> bool {
        self.outcomes.iter().any(|o| o.step == step)
    }
}

impl fmt::Display for SequenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&StepOutcome> = self.failures().collect();
        if failed.is_empty() {
            return write!(f, "{}: all {} steps succeeded", self.operation, self.outcomes.len());
        }
        writeln!(
            f,
            "{}: {} of {} steps failed:",
            self.operation,
            failed.len(),
            self.outcomes.len()
        )?;
        for outcome in failed {
            if let Some(e) = &outcome.error {
                writeln!(f, "  - {}: {}", outcome.detail, e)?;
            }
        }
        Ok(())
    }
}

/// What is currently observable about the hotspot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotStatus {
    pub forwarding: Option<bool>,
    pub interface_up: Option<bool>,
    pub hostapd_pid: Option<u32>,
    pub dnsmasq_pid: Option<u32>,
    pub recorded: Option<RuntimeState>,
}

impl HotspotStatus {
    pub fn is_active(&self) -> bool {
        self.forwarding == Some(true) && self.hostapd_pid.is_some() && self.dnsmasq_pid.is_some()
    }
}

/// Network state controller
pub struct HotspotController<H: HostAdapter> {
    host: H,
    settings: RuntimeSettings,
    hostapd: HostapdController,
    dhcp: DhcpController,
    state: StateFile,
}

impl<H: HostAdapter> HotspotController<H> {
    /// Build a controller; reads the hostapd template if one is configured
    pub async fn new(host: H, settings: RuntimeSettings) -> HotspotResult<Self> {
        let mut hostapd = HostapdController::new(settings.state_dir.clone());
        if let Some(path) = &settings.template_path {
            hostapd = hostapd.with_template_file(path).await?;
        }

        Ok(Self {
            dhcp: DhcpController::new(settings.state_dir.clone()),
            state: StateFile::new(&settings.state_dir),
            hostapd,
            host,
            settings,
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn ensure_privileged(&self) -> HotspotResult<()> {
        if self.host.is_privileged() {
            Ok(())
        } else {
            Err(HotspotError::PermissionDenied(
                "You need root permissions to do this".to_string()
            ))
        }
    }

    /// Run one step; non-fatal failures are recorded and swallowed
    async fn step<T, F>(
        &self,
        report: &mut SequenceReport,
        step: Step,
        detail: impl Into<String>,
        action: F,
    ) -> HotspotResult<Option<T>>
    where
        F: Future<Output = HotspotResult<T>>,
    {
        let detail = detail.into();
        debug!("{}", detail);
        match action.await {
            Ok(value) => {
                report.outcomes.push(StepOutcome { step, detail, error: None });
                Ok(Some(value))
            }
            Err(e) if e.is_fatal() => {
                error!("{} aborted at '{}': {}", report.operation, detail, e);
                Err(e)
            }
            Err(e) => {
                warn!("{} failed: {}", detail, e);
                report.outcomes.push(StepOutcome { step, detail, error: Some(e) });
                Ok(None)
            }
        }
    }

    /// Bring the hotspot up
    pub async fn start(&self, config: &HotspotConfig, free_wireless_first: bool) -> HotspotResult<SequenceReport> {
        self.ensure_privileged()?;
        let prefix_len = config.prefix_len()?;
        let rules = NatRules::new(&config.wlan_interface, &config.uplink_interface)?;
        let wlan = config.wlan_interface.as_str();
        let mut report = SequenceReport::new("start");

        if free_wireless_first {
            info!("freeing wireless radio");
            self.step(&mut report, Step::ReleaseRadio, "release radio from network manager", self.host.release_radio())
                .await?;
            self.host.sleep(self.settings.radio_settle()).await;
        }

        let conf_path = self
            .step(&mut report, Step::RenderApConfig, "render hostapd configuration", self.hostapd.write_config(config))
            .await?;
        if let Some(path) = &conf_path {
            info!("created hostapd configuration: {}", path.display());
        }

        info!(
            "using interface: {} on IP: {} MAC: {}",
            wlan, config.ap_address, config.hardware_address
        );
        let down = self
            .step(&mut report, Step::InterfaceDown, format!("bring {} down", wlan), self.host.interface_down(wlan))
            .await?;

        let mac_detail = format!("set {} hardware address to {}", wlan, config.hardware_address);
        if down.is_some() {
            self.step(
                &mut report,
                Step::SetHardwareAddress,
                mac_detail,
                self.host.set_hardware_address(wlan, &config.hardware_address),
            )
            .await?;
        } else {
            self.step(&mut report, Step::SetHardwareAddress, mac_detail, async {
                Err::<(), _>(HotspotError::InterfaceNotFound(format!(
                    "{} could not be brought down, hardware address left unchanged",
                    wlan
                )))
            })
            .await?;
        }

        self.step(
            &mut report,
            Step::InterfaceUp,
            format!("bring {} up as {}/{}", wlan, config.ap_address, prefix_len),
            self.host.interface_up(wlan, config.ap_address, prefix_len),
        )
        .await?;
        self.wait_for_interface(wlan).await;

        let recorded = self.state.load().await;
        for daemon in [Daemon::Dnsmasq, Daemon::Hostapd] {
            let pid = recorded.as_ref().and_then(|s| recorded_pid(s, daemon));
            self.step(
                &mut report,
                Step::StopDaemon,
                format!("stop running {}", daemon.process_name()),
                self.stop_daemon(daemon, pid),
            )
            .await?;
        }

        info!("enabling forward in sysctl.");
        self.step(&mut report, Step::EnableForwarding, "enable IPv4 forwarding", self.host.set_forwarding(true))
            .await?;

        info!("creating NAT using iptables: {} <--> {}", wlan, config.uplink_interface);
        self.step(&mut report, Step::ForwardPolicy, "set FORWARD policy to ACCEPT", self.host.set_forward_policy(Policy::Accept))
            .await?;
        self.step(&mut report, Step::ResetNat, "reset nat table", self.host.reset_nat()).await?;
        for rule in rules.install_rules() {
            let detail = format!("install rule: {}", rule.append_command());
            self.step(&mut report, Step::InstallRule, detail, self.host.install_rule(&rule)).await?;
        }

        let mut runtime = RuntimeState::new(wlan);

        let dhcp_pid_file = self.dhcp.pid_file();
        let dnsmasq_cmd = self.dhcp.launch_command(config)?;
        info!("running dnsmasq: {}", dnsmasq_cmd);
        runtime.dnsmasq_pid = self
            .step(
                &mut report,
                Step::LaunchDhcp,
                format!("launch {}", DNSMASQ),
                self.launch(Daemon::Dnsmasq, &dnsmasq_cmd, &dhcp_pid_file),
            )
            .await?;

        self.host.sleep(self.settings.daemon_settle()).await;
        let hostapd_pid_file = self.hostapd.pid_file();
        let hostapd_launch = async {
            let path = conf_path.as_deref().ok_or_else(|| {
                HotspotError::ConfigError("no hostapd configuration was written".to_string())
            })?;
            let cmd = self.hostapd.launch_command(path);
            info!("running hostapd: {}", cmd);
            self.launch(Daemon::Hostapd, &cmd, &hostapd_pid_file).await
        };
        runtime.hostapd_pid = self
            .step(&mut report, Step::LaunchAp, format!("launch {}", HOSTAPD), hostapd_launch)
            .await?;

        self.step(&mut report, Step::RecordState, "record daemon pids", self.state.save(&runtime)).await?;

        if report.is_clean() {
            info!("hotspot is running.");
        } else {
            warn!("hotspot started with errors");
        }
        Ok(report)
    }

    /// Tear the hotspot down, mirroring `start`
    pub async fn stop(&self, config: &HotspotConfig) -> HotspotResult<SequenceReport> {
        self.ensure_privileged()?;
        let rules = NatRules::new(&config.wlan_interface, &config.uplink_interface)?;
        let wlan = config.wlan_interface.as_str();
        let mut report = SequenceReport::new("stop");

        self.step(&mut report, Step::InterfaceDown, format!("bring {} down", wlan), self.host.interface_down(wlan))
            .await?;

        let recorded = self.state.load().await;
        let mut daemons_stopped = true;
        for daemon in [Daemon::Hostapd, Daemon::Dnsmasq] {
            let pid = recorded.as_ref().and_then(|s| recorded_pid(s, daemon));
            let stopped = self
                .step(
                    &mut report,
                    Step::StopDaemon,
                    format!("stop {}", daemon.process_name()),
                    self.stop_daemon(daemon, pid),
                )
                .await?;
            daemons_stopped &= stopped.is_some();
        }

        info!("disabling forward rules in iptables.");
        self.step(&mut report, Step::ForwardPolicy, "set FORWARD policy to DROP", self.host.set_forward_policy(Policy::Drop))
            .await?;
        for rule in rules.filter_rules().iter().rev() {
            let detail = format!("remove rule: {}", rule.delete_command());
            self.step(&mut report, Step::RemoveRule, detail, self.host.remove_rule(rule)).await?;
        }
        self.step(&mut report, Step::ResetNat, "reset nat table", self.host.reset_nat()).await?;

        info!("disabling forward in sysctl.");
        self.step(&mut report, Step::DisableForwarding, "disable IPv4 forwarding", self.host.set_forwarding(false))
            .await?;

        // The record is the only handle on daemons that refused to stop
        if daemons_stopped {
            self.step(&mut report, Step::ClearState, "clear recorded pids", self.state.clear()).await?;
        } else {
            warn!("keeping {} while daemons are still running", self.state.path().display());
        }

        if report.is_clean() {
            info!("hotspot has stopped.");
        } else {
            warn!("hotspot stopped with errors");
        }
        Ok(report)
    }

    /// Terminate every process whose name contains `name`
    ///
    /// Returns how many distinct processes were signalled. A process that
    /// survives its signal is sent SIGKILL on the next round.
    pub async fn kill_all_by_name(&self, name: &str, signal: Signal) -> HotspotResult<usize> {
        self.ensure_privileged()?;
        self.kill_matching(name, signal).await
    }

    async fn kill_matching(&self, name: &str, signal: Signal) -> HotspotResult<usize> {
        let mut signalled = HashSet::new();
        let mut refused = HashSet::new();

        for _ in 0..MAX_KILL_ROUNDS {
            let candidates = self.host.find_processes_by_name(name).await;
            let pid = match candidates.into_iter().find(|pid| !refused.contains(pid)) {
                Some(pid) => pid,
                None => return Ok(signalled.len()),
            };

            let sig = if signalled.contains(&pid) { Signal::Kill } else { signal };
            debug!("sending SIG{} to {} ({})", sig.as_str(), pid, name);
            match self.host.terminate_process(pid, sig).await {
                Ok(()) => {
                    signalled.insert(pid);
                    self.wait_for_exit(pid).await;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}", e);
                    refused.insert(pid);
                }
            }
        }

        warn!("{} still running after {} attempts", name, MAX_KILL_ROUNDS);
        Ok(signalled.len())
    }

    /// Observable state, without changing anything
    pub async fn status(&self, config: &HotspotConfig) -> HotspotStatus {
        HotspotStatus {
            forwarding: self.host.forwarding_enabled().await.ok(),
            interface_up: self.host.interface_is_up(&config.wlan_interface).await,
            hostapd_pid: self.host.find_process_by_name(HOSTAPD).await,
            dnsmasq_pid: self.host.find_process_by_name(DNSMASQ).await,
            recorded: self.state.load().await,
        }
    }

    async fn stop_daemon(&self, daemon: Daemon, recorded: Option<u32>) -> HotspotResult<usize> {
        let name = daemon.process_name();
        let mut stopped = 0;

        if let Some(pid) = recorded {
            if self.is_daemon(pid, daemon).await {
                info!("stopping {} (pid {})", name, pid);
                match self.host.terminate_process(pid, daemon.stop_signal()).await {
                    Ok(()) => {
                        self.wait_for_exit(pid).await;
                        stopped += 1;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("recorded {} pid {}: {}", name, pid, e),
                }
            } else {
                debug!("recorded {} pid {} is gone", name, pid);
            }
        }

        if self.host.find_process_by_name(name).await.is_some() {
            info!("stopping {}", name);
            stopped += self.kill_matching(name, daemon.stop_signal()).await?;
        }

        let survivors = self.host.find_processes_by_name(name).await;
        if !survivors.is_empty() {
            return Err(HotspotError::ServiceError(format!(
                "{} still running (pid {:?})",
                name, survivors
            )));
        }

        Ok(stopped)
    }

    async fn is_daemon(&self, pid: u32, daemon: Daemon) -> bool {
        self.host
            .process_name(pid)
            .await
            .map_or(false, |comm| comm.contains(daemon.process_name()))
    }

    async fn wait_for_exit(&self, pid: u32) {
        let poll = self.settings.readiness_poll();
        let mut waited = Duration::ZERO;
        while self.host.process_name(pid).await.is_some() {
            if waited >= EXIT_WAIT {
                debug!("pid {} still present after {:?}", pid, EXIT_WAIT);
                return;
            }
            self.host.sleep(poll).await;
            waited += poll;
        }
    }

    /// Wait until the interface reports up, bounded by the settle time
    ///
    /// Falls back to sleeping the full settle time when the state cannot be
    /// observed.
    async fn wait_for_interface(&self, interface: &str) {
        let settle = self.settings.interface_settle();
        let poll = self.settings.readiness_poll();
        let mut waited = Duration::ZERO;

        loop {
            match self.host.interface_is_up(interface).await {
                Some(true) => {
                    debug!("{} up after {:?}", interface, waited);
                    return;
                }
                None => {
                    self.host.sleep(settle.saturating_sub(waited)).await;
                    return;
                }
                Some(false) if waited >= settle => {
                    warn!("{} not up after {:?}", interface, settle);
                    return;
                }
                Some(false) => {
                    self.host.sleep(poll).await;
                    waited += poll;
                }
            }
        }
    }

    /// Spawn a self-daemonizing process and find the PID it settles on
    ///
    /// Fails when no live process can be found once the settle time is over.
    async fn launch(&self, daemon: Daemon, cmd: &CommandSpec, pid_file: &Path) -> HotspotResult<u32> {
        remove_stale(pid_file).await;
        let handle = self.host.spawn_daemon(cmd).await?;

        let poll = self.settings.readiness_poll();
        let mut waited = Duration::ZERO;
        loop {
            if let Some(pid) = state::read_pid_file(pid_file).await {
                if self.is_daemon(pid, daemon).await {
                    return Ok(pid);
                }
            }
            if waited >= self.settings.daemon_settle() {
                break;
            }
            self.host.sleep(poll).await;
            waited += poll;
        }

        if self.is_daemon(handle.pid, daemon).await {
            return Ok(handle.pid);
        }
        self.host
            .find_process_by_name(daemon.process_name())
            .await
            .ok_or_else(|| {
                HotspotError::ServiceError(format!(
                    "{} is not running after launch ('{}')",
                    daemon.process_name(),
                    cmd
                ))
            })
    }
}

fn recorded_pid(state: &RuntimeState, daemon: Daemon) -> Option<u32> {
    match daemon {
        Daemon::Hostapd => state.hostapd_pid,
        Daemon::Dnsmasq => state.dnsmasq_pid,
    }
}

async fn remove_stale(path: &Path) {
    if fs::remove_file(path).await.is_ok() {
        debug!("removed stale pid file {}", path.display());
    }
}

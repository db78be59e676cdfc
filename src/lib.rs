//! hotspotd - WiFi hotspot library
//!
//! Turns a wireless interface into an access point that shares another
//! interface's connection:
//! - Access point (hostapd)
//! - DHCP server (dnsmasq)
//! - NAT and forwarding (iptables, sysctl)
//! - Interface address and hardware address setup (ip)
//! - Daemon supervision by PID file and process name
//!
//! Configuration is persisted as TOML between runs.

pub mod error;
pub mod validation;
pub mod runner;
pub mod probe;
pub mod sysctl;
pub mod hostapd;
pub mod dhcp;
pub mod firewall;
pub mod host;
pub mod state;
pub mod config;
pub mod controller;

// Re-export commonly used types
pub use error::{HotspotError, HotspotResult};
pub use runner::{CommandOutcome, CommandRunner, CommandSpec, ProcessHandle, SystemRunner};
pub use probe::{InterfaceRecord, SystemProbe};
pub use hostapd::HostapdController;
pub use dhcp::{DhcpController, DhcpRange};
pub use firewall::{NatRules, Policy, Rule};
pub use host::{HostAdapter, LinuxHost, Signal};
pub use state::{RuntimeState, StateFile};
pub use config::{ConfigStore, HotspotConfig, RuntimeSettings};
pub use controller::{HotspotController, HotspotStatus, SequenceReport, Step, StepOutcome};

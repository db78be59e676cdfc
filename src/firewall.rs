//! iptables rule sets for NAT between the access point and the uplink
//!
//! Only builds command lines; the host adapter decides when to run them.

use crate::error::HotspotResult;
use crate::runner::CommandSpec;
use crate::validation;

pub const IPTABLES: &str = "iptables";

/// Table types in netfilter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    fn as_str(&self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

/// Built-in chains we touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Input,
    Output,
    Forward,
    Postrouting,
}

impl Chain {
    fn as_str(&self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
            Chain::Forward => "FORWARD",
            Chain::Postrouting => "POSTROUTING",
        }
    }
}

/// Default chain policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
}

impl Policy {
    fn as_str(&self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
        }
    }
}

/// One rule: where it lives and its match/target arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub table: Table,
    pub chain: Chain,
    pub spec: Vec<String>,
}

impl Rule {
    fn new(table: Table, chain: Chain, spec: &[&str]) -> Self {
        Self {
            table,
            chain,
            spec: spec.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn command(&self, op: &str) -> CommandSpec {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            op.to_string(),
            self.chain.as_str().to_string(),
        ];
        args.extend(self.spec.iter().cloned());
        CommandSpec::new(IPTABLES, &args)
    }

    /// `iptables -C`: exits zero when the rule is present
    pub fn check_command(&self) -> CommandSpec {
        self.command("-C")
    }

    pub fn append_command(&self) -> CommandSpec {
        self.command("-A")
    }

    pub fn delete_command(&self) -> CommandSpec {
        self.command("-D")
    }
}

/// The rules that make `wlan` clients reach the internet through `uplink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRules {
    wlan: String,
    uplink: String,
}

impl NatRules {
    pub fn new(wlan: &str, uplink: &str) -> HotspotResult<Self> {
        validation::validate_interface_name(wlan)?;
        validation::validate_interface_name(uplink)?;
        Ok(Self {
            wlan: wlan.to_string(),
            uplink: uplink.to_string(),
        })
    }

    pub fn masquerade(&self) -> Rule {
        Rule::new(Table::Nat, Chain::Postrouting, &["-o", &self.uplink, "-j", "MASQUERADE"])
    }

    /// Forwarding and interface accept rules, in install order
    ///
    /// `stop` deletes exactly this set.
    pub fn filter_rules(&self) -> Vec<Rule> {
        vec![
            Rule::new(Table::Filter, Chain::Forward, &[
                "-i", &self.uplink, "-o", &self.wlan,
                "-m", "state", "--state", "RELATED,ESTABLISHED",
                "-j", "ACCEPT",
            ]),
            Rule::new(Table::Filter, Chain::Forward, &["-i", &self.wlan, "-o", &self.uplink, "-j", "ACCEPT"]),
            Rule::new(Table::Filter, Chain::Output, &["-o", &self.uplink, "-j", "ACCEPT"]),
            Rule::new(Table::Filter, Chain::Input, &["-i", &self.wlan, "-j", "ACCEPT"]),
        ]
    }

    /// Everything installed on start, masquerade first
    pub fn install_rules(&self) -> Vec<Rule> {
        let mut rules = vec![self.masquerade()];
        rules.extend(self.filter_rules());
        rules
    }
}

pub fn policy_command(chain: Chain, policy: Policy) -> CommandSpec {
    CommandSpec::new(IPTABLES, &["-P", chain.as_str(), policy.as_str()])
}

/// Flush the nat table and delete its user-defined chains
pub fn nat_reset_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new(IPTABLES, &["-t", "nat", "-F"]),
        CommandSpec::new(IPTABLES, &["-t", "nat", "-X"]),
    ]
}

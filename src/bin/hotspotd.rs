//! hotspotd - WiFi hotspot command line
//!
//! Collects and stores the hotspot configuration, then starts and stops the
//! access point, DHCP server and NAT from it.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use libhotspotd::config::{
    DEFAULT_AP_ADDRESS, DEFAULT_HARDWARE_ADDRESS, DEFAULT_NETMASK, DEFAULT_PASSWORD,
    DEFAULT_SETTINGS_PATH, DEFAULT_SSID,
};
use libhotspotd::validation;
use libhotspotd::{
    CommandRunner, ConfigStore, HotspotConfig, HotspotController, HotspotError, LinuxHost,
    RuntimeSettings, SequenceReport, Signal, SystemProbe, SystemRunner,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Executables the hotspot cannot run without
const REQUIRED_BINARIES: &[&str] = &["hostapd", "dnsmasq"];

/// Executables used for setup; a missing one degrades individual steps
const SUPPORT_BINARIES: &[&str] = &["iptables", "ip", "sysctl"];

/// Exit status when a sequence ran to the end with failed steps
const EXIT_STEP_FAILURES: i32 = 2;

#[derive(Parser)]
#[command(name = "hotspotd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Share an internet connection through a WiFi access point", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Hotspot configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Runtime settings file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect, validate and save the hotspot configuration
    Configure(ConfigureArgs),
    /// Start the hotspot
    Start {
        /// Take the radio away from NetworkManager first
        #[arg(long)]
        free_wireless: bool,
    },
    /// Stop the hotspot
    Stop,
    /// Check that the required executables are installed
    Check,
    /// Show the current hotspot state
    Status,
    /// Terminate every process whose name contains NAME
    KillAll {
        name: String,
        /// Send SIGKILL instead of SIGTERM
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args, Default)]
struct ConfigureArgs {
    /// Wireless interface to run the access point on
    #[arg(short = 'W', long)]
    wlan: Option<String>,

    /// Interface with internet access
    #[arg(short = 'I', long)]
    inet: Option<String>,

    /// Access point IPv4 address
    #[arg(short = 'i', long)]
    ip: Option<String>,

    /// Access point netmask
    #[arg(short = 'n', long)]
    netmask: Option<String>,

    /// Hardware address for the wireless interface
    #[arg(short = 'm', long)]
    mac: Option<String>,

    /// Network name
    #[arg(short = 's', long)]
    ssid: Option<String>,

    /// WPA passphrase, 8 characters minimum
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Use defaults for anything not given instead of asking
    #[arg(long)]
    no_prompt: bool,
}

/// Initialize logging based on command-line arguments
fn init_logging(debug: bool) {
    let log_level = if debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!("hotspotd={},libhotspotd={}", log_level, log_level))
        });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .init();
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn new_runner(settings: &RuntimeSettings) -> Arc<dyn CommandRunner> {
    Arc::new(SystemRunner::with_timeout(settings.command_timeout()))
}

fn new_probe(runner: Arc<dyn CommandRunner>, settings: &RuntimeSettings) -> SystemProbe {
    SystemProbe::new(runner).with_binary_dirs(settings.binary_dirs.clone())
}

async fn new_controller(settings: RuntimeSettings) -> Result<HotspotController<LinuxHost>> {
    let runner = new_runner(&settings);
    let host = LinuxHost::new(runner.clone(), new_probe(runner, &settings));
    Ok(HotspotController::new(host, settings).await?)
}

fn load_config(store: &ConfigStore) -> Result<HotspotConfig> {
    match store.load() {
        Ok(config) => Ok(config),
        Err(HotspotError::ConfigNotFound(path)) => Err(anyhow!(
            "No configuration at {}, run 'hotspotd configure' first",
            path.display()
        )),
        Err(e) => Err(e.into()),
    }
}

fn prompt_err(e: dialoguer::Error) -> anyhow::Error {
    anyhow!("prompt failed: {}", e)
}

/// Ask for one value, re-asking until `check` accepts it
fn ask<F>(prompt: &str, default: String, interactive: bool, check: F) -> Result<String>
where
    F: Fn(&str) -> libhotspotd::HotspotResult<()>,
{
    if !interactive {
        check(&default)?;
        return Ok(default);
    }

    let mut input = Input::<String>::new().with_prompt(prompt);
    if !default.is_empty() {
        input = input.default(default);
    }
    input
        .validate_with(|value: &String| -> std::result::Result<(), String> {
            check(value).map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)
}

fn ask_password(default: &str, interactive: bool) -> Result<String> {
    if !interactive {
        return Ok(default.to_string());
    }

    loop {
        let password = Password::new()
            .with_prompt(format!("WiFi password [{}]", default))
            .with_confirmation("Repeat password", "Passwords do not match")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_err)?;
        let password = if password.is_empty() { default.to_string() } else { password };
        match validation::validate_wifi_password(&password) {
            Ok(()) => return Ok(password),
            Err(e) => eprintln!("{}", e),
        }
    }
}

/// Validate whatever was given on the command line before probing anything
fn check_arguments(args: &ConfigureArgs) -> Result<()> {
    if let Some(ip) = &args.ip {
        validation::validate_ipv4_address(ip)?;
    }
    if let Some(netmask) = &args.netmask {
        let mask = validation::validate_ipv4_address(netmask)?;
        validation::netmask_prefix_len(mask)?;
    }
    if let Some(mac) = &args.mac {
        validation::normalize_mac_address(mac)?;
    }
    if let Some(ssid) = &args.ssid {
        validation::validate_ssid(ssid)?;
    }
    if let Some(password) = &args.password {
        validation::validate_wifi_password(password)?;
    }
    Ok(())
}

async fn handle_configure(args: ConfigureArgs, store: &ConfigStore, settings: &RuntimeSettings) -> Result<i32> {
    check_arguments(&args)?;

    let probe = new_probe(new_runner(settings), settings);
    let interactive = !args.no_prompt && atty::is(atty::Stream::Stdin);
    let wireless = probe.wireless_interface_names().await?;
    let all: Vec<String> = probe.list_interfaces().await?.into_iter().map(|r| r.name).collect();
    debug!("wireless interfaces: {:?}, all interfaces: {:?}", wireless, all);

    let wlan = match args.wlan {
        Some(wlan) => wlan,
        None => {
            let detected = probe.auto_detect_wifi_interface().await.unwrap_or_default();
            ask("Wireless interface", detected, interactive, |v| {
                validation::validate_member(v, &wireless, "wireless")
            })?
        }
    };
    validation::validate_member(&wlan, &wireless, "wireless")?;

    let inet = match args.inet {
        Some(inet) => inet,
        None => {
            let uplink = probe.default_route_interface().await.unwrap_or_default();
            ask("Internet interface", uplink, interactive, |v| {
                validation::validate_member(v, &all, "uplink")
            })?
        }
    };
    validation::validate_member(&inet, &all, "uplink")?;

    let ip = match args.ip {
        Some(ip) => ip,
        None => ask("Access point IP", DEFAULT_AP_ADDRESS.to_string(), interactive, |v| {
            validation::validate_ipv4_address(v).map(|_| ())
        })?,
    };

    let netmask = match args.netmask {
        Some(netmask) => netmask,
        None => ask("Netmask", DEFAULT_NETMASK.to_string(), interactive, |v| {
            validation::netmask_prefix_len(validation::validate_ipv4_address(v)?).map(|_| ())
        })?,
    };

    let mac = match args.mac {
        Some(mac) => mac,
        None => {
            let current = probe
                .hardware_address(&wlan)
                .await
                .unwrap_or_else(|| DEFAULT_HARDWARE_ADDRESS.to_string());
            ask("Hardware address", current, interactive, |v| {
                validation::normalize_mac_address(v).map(|_| ())
            })?
        }
    };

    let ssid = match args.ssid {
        Some(ssid) => ssid,
        None => ask("SSID", DEFAULT_SSID.to_string(), interactive, validation::validate_ssid)?,
    };

    let password = match args.password {
        Some(password) => password,
        None => ask_password(DEFAULT_PASSWORD, interactive)?,
    };

    let mut config = HotspotConfig {
        wlan_interface: wlan,
        uplink_interface: inet,
        ap_address: validation::validate_ipv4_address(&ip)?,
        netmask: validation::validate_ipv4_address(&netmask)?,
        hardware_address: mac,
        ssid,
        password,
    };
    config.validate()?;
    store.save(&config)?;

    info!("configuration saved to {}", store.path().display());
    println!("Configuration saved. Run 'hotspotd start' to start the hotspot.");
    Ok(0)
}

fn report_exit_code(report: &SequenceReport) -> i32 {
    if report.is_clean() {
        0
    } else {
        eprint!("{}", report);
        EXIT_STEP_FAILURES
    }
}

async fn handle_start(free_wireless: bool, store: &ConfigStore, settings: RuntimeSettings) -> Result<i32> {
    let config = load_config(store)?;
    let controller = new_controller(settings).await?;
    let report = controller.start(&config, free_wireless).await?;
    Ok(report_exit_code(&report))
}

async fn handle_stop(store: &ConfigStore, settings: RuntimeSettings) -> Result<i32> {
    let config = load_config(store)?;
    let controller = new_controller(settings).await?;
    let report = controller.stop(&config).await?;
    Ok(report_exit_code(&report))
}

async fn handle_check(settings: &RuntimeSettings) -> Result<i32> {
    let probe = new_probe(new_runner(settings), settings);
    let mut missing = 0;

    for name in REQUIRED_BINARIES {
        match probe.find_executable(name).await {
            Some(path) => println!("{}: {}", name, path.display()),
            None => {
                println!("{}: not found", name);
                missing += 1;
            }
        }
    }
    for name in SUPPORT_BINARIES {
        match probe.find_executable(name).await {
            Some(path) => println!("{}: {}", name, path.display()),
            None => println!("{}: not found (warning)", name),
        }
    }

    if missing > 0 {
        eprintln!("{} required executable(s) missing", missing);
        Ok(1)
    } else {
        println!("All required executables found.");
        Ok(0)
    }
}

async fn handle_status(store: &ConfigStore, settings: RuntimeSettings) -> Result<i32> {
    let config = load_config(store)?;
    let controller = new_controller(settings).await?;
    let status = controller.status(&config).await;

    let describe = |value: Option<bool>| match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    };
    let pid = |value: Option<u32>| value.map_or_else(|| "not running".to_string(), |p| p.to_string());

    println!("hotspot:      {}", if status.is_active() { "active" } else { "inactive" });
    println!("interface:    {} (up: {})", config.wlan_interface, describe(status.interface_up));
    println!("uplink:       {}", config.uplink_interface);
    println!("forwarding:   {}", describe(status.forwarding));
    println!("hostapd:      {}", pid(status.hostapd_pid));
    println!("dnsmasq:      {}", pid(status.dnsmasq_pid));
    if let Some(recorded) = &status.recorded {
        println!("started at:   {}", recorded.started_at.to_rfc3339());
    }
    Ok(0)
}

async fn handle_kill_all(name: &str, force: bool, settings: RuntimeSettings) -> Result<i32> {
    let controller = new_controller(settings).await?;
    let signal = if force { Signal::Kill } else { Signal::Term };
    let count = controller.kill_all_by_name(name, signal).await?;
    println!("Terminated {} process(es) matching '{}'", count, name);
    Ok(0)
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = RuntimeSettings::load_or_default(&cli.settings)
        .with_context(|| format!("loading {}", cli.settings.display()))?;
    let store = ConfigStore::new(cli.config);

    match cli.command {
        Commands::Configure(args) => handle_configure(args, &store, &settings).await,
        Commands::Start { free_wireless } => handle_start(free_wireless, &store, settings).await,
        Commands::Stop => handle_stop(&store, settings).await,
        Commands::Check => handle_check(&settings).await,
        Commands::Status => handle_status(&store, settings).await,
        Commands::KillAll { name, force } => handle_kill_all(&name, force, settings).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if !is_root() {
        eprintln!("You need root permissions to do this!");
        process::exit(1);
    }

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

//! lxc-hotplug-attach
//!
//! Invoked once per device event by a udev rule. Attaches the device node to
//! the named container and reports the outcome to the job-log collector.

use clap::Parser;
use common::{DEFAULT_SYSLOG_SOCKET, SyslogMirror, setup_logging};
use hotplug::config::{self, HelperConfig, MAX_LINGER_MS};
use hotplug::{
    AttachExecutor, ChannelConfig, DeviceEvent, HelperExit, Orchestrator, PROGRAM_NAME,
    PathResolver, ReportChannel,
};
use protocol::Level;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "lxc-hotplug-attach")]
#[command(
    author,
    version,
    about = "Attach a hotplugged device node to a running LXC container"
)]
#[command(long_about = "
Attach a host device node to a running LXC container and report the outcome
to a remote job-log collector.

EXAMPLES:
    # Typical udev invocation
    lxc-hotplug-attach --lxc-name worker-1 --device-node bus/usb/001/002 --job-id 4711

    # Report to a collector over mutual TLS
    lxc-hotplug-attach --lxc-name worker-1 --device-node bus/usb/001/002 --job-id 4711 \\
        --logging-url tcp://logs.example.org:5555 \\
        --server-cert /etc/lxc-hotplug/collector.crt --client-cert /etc/lxc-hotplug/helper.pem

EXIT STATUS:
    0  device attached, or device no longer present
    2  bind link or attach command failed
    3  invalid input, configuration or report channel, or unexpected error

CONFIGURATION:
    The helper looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/lxc-hotplug/helper.toml
    3. /etc/lxc-hotplug/helper.toml
    4. Built-in defaults
")]
struct Args {
    /// Container to attach the device to
    #[arg(long, value_name = "NAME")]
    lxc_name: String,

    /// Device node relative to /dev, e.g. bus/usb/001/002
    #[arg(long, value_name = "NODE")]
    device_node: String,

    /// Job the events belong to
    #[arg(long, value_name = "ID")]
    job_id: String,

    /// Collector URL (tcp://host:port); events stay local when omitted
    #[arg(long, value_name = "URL")]
    logging_url: Option<String>,

    /// Collector certificate used as trust root
    #[arg(long, alias = "master-cert", value_name = "PATH")]
    server_cert: Option<String>,

    /// PEM file with this helper's certificate chain and private key
    #[arg(long, alias = "slave-cert", value_name = "PATH")]
    client_cert: Option<String>,

    /// Allow IPv6 addresses for the collector
    #[arg(long)]
    ipv6: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Bound on the report drain at exit, in milliseconds
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..=MAX_LINGER_MS))]
    linger_ms: Option<u64>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.use_stderr() {
                HelperExit::Fatal.into()
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    run(args).into()
}

fn run(args: Args) -> HelperExit {
    let config = match HelperConfig::load(args.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", PROGRAM_NAME, e);
            SyslogMirror::new(DEFAULT_SYSLOG_SOCKET, PROGRAM_NAME, &args.job_id)
                .log(Level::Error, &format!("Invalid configuration: {:#}", e));
            return HelperExit::Fatal;
        }
    };

    let mirror = if config.report.syslog {
        SyslogMirror::new(&config.report.syslog_socket, PROGRAM_NAME, &args.job_id)
    } else {
        SyslogMirror::disabled(&args.job_id)
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.helper.log_level);
    let logging = config::validate_log_level(log_level)
        .and_then(|_| setup_logging(log_level).map_err(anyhow::Error::from));
    if let Err(e) = logging {
        eprintln!("{}: {:#}", PROGRAM_NAME, e);
        mirror.log(Level::Error, "Unable to setup the logger, exiting.");
        return HelperExit::Fatal;
    }

    info!("{} v{}", PROGRAM_NAME, env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);
    warn_if_not_root();

    let channel_config = ChannelConfig {
        endpoint_url: args.logging_url.clone(),
        server_cert: args.server_cert.as_deref().map(config::expand_path),
        client_cert: args.client_cert.as_deref().map(config::expand_path),
        enable_ipv6: args.ipv6,
    };

    let mut channel = ReportChannel::new(&args.job_id, mirror);
    if let Err(e) = channel.open(&channel_config) {
        let url = channel_config.endpoint_url.as_deref().unwrap_or("local");
        error!("Unable to open report channel to {}: {}", url, e);
        channel.mirror().log(
            Level::Error,
            &format!("Unable to open report channel to {}: {}", url, e),
        );
        channel
            .mirror()
            .log(Level::Error, "Unable to setup the logger, exiting.");
        return HelperExit::Fatal;
    }

    let linger = args
        .linger_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.report.linger());

    let event = DeviceEvent::new(args.lxc_name, args.device_node, args.job_id);
    let resolver = PathResolver::new(config.devices.host_root, config.devices.container_root);
    let executor = AttachExecutor::new(config.attach.program).with_args(config.attach.args);

    let exit = Orchestrator::new(event, resolver, executor, &mut channel)
        .with_linger(linger)
        .run();
    debug!("Exiting with status {}", exit.code());
    exit
}

#[cfg(target_os = "linux")]
fn warn_if_not_root() {
    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root; creating links or attaching devices may fail");
    }
}

#[cfg(not(target_os = "linux"))]
fn warn_if_not_root() {}

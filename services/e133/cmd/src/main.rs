//! E1.33 device monitor binary.
//!
//! Locates E1.33 devices with SLP (or takes a fixed list of addresses), opens
//! a TCP session to each and keeps it alive with heartbeats, logging RDM
//! traffic the devices send to endpoint zero.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use e133_discovery::{DiscoveryThread, SlpAgent};
use e133_session::{LinearBackoffPolicy, Monitor, SessionLossPolicy, TcpConnector};
use e133_wire::PidStore;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::MonitorConfig;
use logging::MonitorLogFormatter;

/// sysexits(3) status codes
const EX_USAGE: u8 = 64;
const EX_UNAVAILABLE: u8 = 69;
const EX_OSFILE: u8 = 72;

/// Monitor E1.33 devices
#[derive(Parser, Debug)]
#[command(
    name = "e133-monitor",
    version,
    about = "Open a session to every E1.33 device and keep it alive"
)]
struct Args {
    /// Comma separated device addresses to connect to instead of running discovery
    #[arg(short, long, value_delimiter = ',')]
    targets: Vec<String>,

    /// PID dictionary used to name RDM parameters
    #[arg(short, long, default_value = "pids.yaml")]
    pid_file: PathBuf,

    /// Log level: 0 off, 1 error, 2 warn, 3 info, 4 debug
    #[arg(
        short,
        long,
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(0..=4)
    )]
    log_level: u8,

    /// Optional YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop the monitor when any session is lost instead of reconnecting
    #[arg(long)]
    exit_on_session_loss: bool,
}

fn filter_directive(log_level: u8) -> &'static str {
    match log_level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        _ => "debug",
    }
}

/// Every token must be a dotted quad; empty or padded tokens are rejected
fn parse_targets(targets: &[String]) -> Result<Vec<Ipv4Addr>, String> {
    targets
        .iter()
        .map(|target| target.parse().map_err(|_| target.clone()))
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive(args.log_level)))
        .event_format(MonitorLogFormatter::new("e133"))
        .init();

    let targets = match parse_targets(&args.targets) {
        Ok(targets) => targets,
        Err(bad) => {
            eprintln!("Invalid target address: {:?}\n", bad);
            let _ = Args::command().print_help();
            return ExitCode::from(EX_USAGE);
        }
    };

    let mut config = match MonitorConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            component_error!("monitor", "{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.exit_on_session_loss {
        config.exit_on_session_loss = true;
    }
    component_debug!("monitor", "Configuration: {:?}", config);

    let pids = match PidStore::load(&args.pid_file) {
        Ok(pids) => Arc::new(pids),
        Err(e) => {
            component_error!("monitor", "Failed to load PID dictionary: {}", e);
            return ExitCode::from(EX_OSFILE);
        }
    };

    let settings = config.monitor_settings();
    if settings.session_loss == SessionLossPolicy::Shutdown {
        component_info!("monitor", "Monitor will stop when any session is lost");
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let connector = TcpConnector::new(config.connect_timeout, events_tx.clone());
    let backoff = Arc::new(LinearBackoffPolicy::new(
        config.initial_retry_delay,
        config.max_retry_delay,
    ));
    let mut monitor = Monitor::new(
        settings,
        Box::new(connector),
        backoff,
        pids,
        events_tx,
        events_rx,
    );

    if targets.is_empty() {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let agent = SlpAgent::new(config.slp_config());
        let mut discovery = DiscoveryThread::new(Box::new(agent), results_tx);

        if let Err(e) = discovery.init() {
            component_error!("discovery", "Failed to initialize SLP: {}", e);
            return ExitCode::from(EX_UNAVAILABLE);
        }
        if let Err(e) = discovery.start() {
            component_error!("discovery", "Failed to start discovery thread: {}", e);
            return ExitCode::from(EX_UNAVAILABLE);
        }
        monitor.attach_discovery(discovery, results_rx);
    } else {
        monitor.populate_responder_list(&targets);
    }

    let handle = monitor.handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                component_info!("monitor", "Received SIGINT, shutting down");
                handle.stop();
            }
            Err(e) => component_warn!("monitor", "Failed to listen for SIGINT: {}", e),
        }
    });

    match monitor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            component_error!("monitor", "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

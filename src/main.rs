use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use powerpack_lib::commands::{self, ShellCommand};
use powerpack_lib::firmware::{DeviceSettings, VirtualDevice};
use powerpack_lib::serial::{Connector, SerialConnector, SerialInterface};
use powerpack_lib::session::{SessionEvent, SessionManager};
use powerpack_lib::SessionConfig;

/// Firmware timer period; the board pushes status every `status_push_ticks` of these
const SIMULATED_TICK: Duration = Duration::from_secs(1);
const SIMULATED_ENDPOINT: &str = "virtual";

#[derive(Parser)]
#[command(version, about = "Control a PowerPack R2M1 relay/dimmer board over USB serial")]
struct Cli {
    /// Serial port, e.g. COM3 or /dev/ttyACM0 (auto-detected when omitted)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Session configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List serial ports and detected boards
    Ports,
    /// Print relay and dimmer state
    Status,
    /// Print the firmware version
    Version,
    /// Switch a relay
    Relay {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        relay: u8,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Set a dimmer output level in percent
    Dimmer {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        dimmer: u8,
        percentage: f32,
    },
    /// Enable a dimmer output
    Enable {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        dimmer: u8,
    },
    /// Disable a dimmer output
    Disable {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        dimmer: u8,
    },
    /// Relays off, dimmers disabled and zeroed
    AllOff,
    /// Stay connected and print session events until Ctrl-C
    Monitor,
    /// Interactive command prompt
    Shell,
    /// Run the relay and dimmer test sequence
    Test {
        /// Milliseconds per dimmer step
        #[arg(long, default_value_t = 500)]
        step_ms: u64,
    },
    /// Interactive prompt against an in-process virtual board
    Simulate {
        /// Firmware debug echo after every frame
        #[arg(long)]
        echo: bool,
    },
}

#[derive(Copy, Clone, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match cli.command {
        CliCommand::Ports => list_ports(),
        CliCommand::Simulate { echo } => simulate(config, echo).await,
        command => {
            let endpoint = resolve_port(cli.port.as_deref())?;
            let connector: Arc<dyn Connector> = Arc::new(SerialConnector::new(config.baud_rate));
            let manager = SessionManager::new(connector, config);
            connect(&manager, &endpoint).await?;

            let result = run(&manager, command).await;
            if let Err(e) = manager.disconnect().await {
                log::debug!("Disconnect: {}", e);
            }
            result
        }
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = SerialInterface::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }

    for device in SerialInterface::discover_devices()? {
        println!(
            "PowerPack candidate: {} ({:04X}:{:04X}) {}",
            device.port_name,
            device.vid,
            device.pid,
            device.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn resolve_port(port: Option<&str>) -> anyhow::Result<String> {
    if let Some(port) = port {
        return Ok(SerialInterface::port_from_selection(port).to_string());
    }

    let devices = SerialInterface::discover_devices()?;
    match devices.first() {
        Some(device) => {
            log::info!("Auto-detected PowerPack on {}", device.port_name);
            Ok(device.port_name.clone())
        }
        None => bail!("No PowerPack board found; pass --port"),
    }
}

async fn connect(manager: &SessionManager, endpoint: &str) -> anyhow::Result<()> {
    let report = manager
        .connect(endpoint)
        .await
        .with_context(|| format!("connecting to {}", endpoint))?;

    if !report.boot_message_observed {
        eprintln!("Warning: no boot message received from device");
    }
    match report.firmware_version {
        Some(version) => println!("Connected to {} (firmware {})", report.endpoint, version),
        None => println!("Connected to {}", report.endpoint),
    }
    Ok(())
}

async fn run(manager: &SessionManager, command: CliCommand) -> anyhow::Result<()> {
    let outcome = match command {
        CliCommand::Status => commands::get_status(manager).await,
        CliCommand::Version => commands::get_version(manager).await,
        CliCommand::Relay { relay, state } => commands::set_relay(manager, relay, matches!(state, Switch::On)).await,
        CliCommand::Dimmer { dimmer, percentage } => commands::set_dimmer(manager, dimmer, percentage).await,
        CliCommand::Enable { dimmer } => commands::enable_dimmer(manager, dimmer, true).await,
        CliCommand::Disable { dimmer } => commands::enable_dimmer(manager, dimmer, false).await,
        CliCommand::AllOff => commands::all_off(manager).await,
        CliCommand::Test { step_ms } => commands::run_test_sequence(manager, Duration::from_millis(step_ms)).await,
        CliCommand::Monitor => return monitor(manager).await,
        CliCommand::Shell => return shell(manager).await,
        CliCommand::Ports | CliCommand::Simulate { .. } => unreachable!("handled before connecting"),
    };

    let message = outcome.map_err(|e| anyhow!(e))?;
    println!("{}", message);
    Ok(())
}

async fn monitor(manager: &SessionManager) -> anyhow::Result<()> {
    let mut events = manager.subscribe_events();
    println!("Monitoring; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::MirrorUpdated(state)) => println!("{}", commands::format_status(&state)),
                Ok(SessionEvent::LinkError(e)) => bail!("link lost: {}", e),
                Ok(event) => println!("{:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => log::warn!("Skipped {} events", n),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn shell(manager: &SessionManager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    println!("{}", ShellCommand::USAGE);

    loop {
        stdout.write_all(b"powerpack> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match ShellCommand::parse(&line) {
            Ok(ShellCommand::Quit) => break,
            Ok(command) => match command.execute(manager).await {
                Ok(message) => println!("{}", message),
                Err(e) => println!("Error: {}", e),
            },
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

async fn simulate(config: SessionConfig, echo: bool) -> anyhow::Result<()> {
    let settings = DeviceSettings {
        echo_frames: echo,
        ..DeviceSettings::default()
    };
    let device = VirtualDevice::new(settings);
    let timer = device.spawn_status_timer(SIMULATED_TICK);

    let manager = SessionManager::new(Arc::new(device), config);
    connect(&manager, SIMULATED_ENDPOINT).await?;
    let result = shell(&manager).await;

    if let Err(e) = manager.disconnect().await {
        log::debug!("Disconnect: {}", e);
    }
    timer.abort();
    result
}

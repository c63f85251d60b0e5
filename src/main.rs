use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use kneespa::{
    default_config_path, init_logging, list_ports, loopback, AppEvent, Config, ConnectionEvent,
    ConnectionParams, DeviceTracker, EventBus, EventFilter, ProtocolParams, RunOutcome,
    SessionCoordinator, SimulatedRig, Transport, BUILD_DATE, RESET_PROTOCOL, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (JSON or TOML); defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List serial ports that look like the rig's controller
    Ports,
    /// Run a therapy protocol
    Run {
        /// Protocol identifier: A, B, C, D, AB, AC, AD, AC1..AC9
        protocol: String,
        #[command(flatten)]
        link: LinkArgs,
        /// Traction force in pounds
        #[arg(long)]
        pressure: Option<f64>,
        /// Number of cycles
        #[arg(long)]
        cycles: Option<u32>,
        /// Lateral swing to the left, degrees
        #[arg(long)]
        left: Option<f64>,
        /// Lateral swing to the right, degrees
        #[arg(long)]
        right: Option<f64>,
        /// Lower flexion extreme, degrees
        #[arg(long, allow_hyphen_values = true)]
        minus: Option<f64>,
        /// Upper flexion extreme, degrees
        #[arg(long, allow_hyphen_values = true)]
        plus: Option<f64>,
    },
    /// Re-home every drive and reload calibration
    Reset {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Serial port; overrides the configured port
    #[arg(long)]
    port: Option<String>,
    /// Talk to a simulated rig instead of hardware
    #[arg(long, default_value_t = false)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    tracing::debug!("kneespa {} (built {})", VERSION, BUILD_DATE);

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        CliCommand::Ports => show_ports(),
        CliCommand::InitConfig { force } => {
            if config_path.exists() && !force {
                bail!("{} already exists (use --force)", config_path.display());
            }
            Config::default().save_to_file(&config_path)?;
            println!("Wrote {}", config_path.display());
            Ok(())
        }
        CliCommand::Run {
            protocol,
            link,
            pressure,
            cycles,
            left,
            right,
            minus,
            plus,
        } => {
            let params = ProtocolParams {
                pressure,
                cycles,
                left,
                right,
                minus,
                plus,
            };
            let config = Config::load_or_default(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            run_protocol(config, &link, &protocol, &params).await
        }
        CliCommand::Reset { link } => {
            let config = Config::load_or_default(&config_path)
                .with_context(|| format!("loading {}", config_path.display()))?;
            run_protocol(config, &link, RESET_PROTOCOL, &ProtocolParams::default()).await
        }
    }
}

fn show_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No candidate serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.port_name, port.description);
    }
    Ok(())
}

/// Configured port, the one given on the command line, or the first candidate
fn resolve_port(config: &Config, link: &LinkArgs) -> anyhow::Result<String> {
    if let Some(port) = &link.port {
        return Ok(port.clone());
    }
    if !config.connection.is_auto() {
        return Ok(config.connection.port.clone());
    }
    list_ports()?
        .into_iter()
        .next()
        .map(|port| port.port_name)
        .context("no serial port found; pass --port")
}

fn open_session(config: Config, link: &LinkArgs) -> anyhow::Result<Arc<SessionCoordinator>> {
    let bus = Arc::new(EventBus::new());
    bus.subscribe(EventFilter::All, |event| match &event {
        AppEvent::Device(device) => tracing::debug!("{}", device),
        AppEvent::Protocol(_) | AppEvent::Connection(_) => tracing::info!("{}", event),
        AppEvent::Error(_) => tracing::error!("{}", event),
    });

    let (transport, events) = if link.simulate {
        let (host, device) = loopback("simulated");
        let mut rig = SimulatedRig::new(config.actuators.clone());
        device.serve(move |line| rig.respond(line));
        Transport::open(Box::new(host))?
    } else {
        let port = resolve_port(&config, link)?;
        let params = ConnectionParams {
            port: port.clone(),
            baud_rate: config.connection.baud_rate,
            timeout_ms: config.connection.timeout_ms,
        };
        params.validate()?;
        let _ = bus.publish(AppEvent::Connection(ConnectionEvent::Connecting {
            port: port.clone(),
        }));
        match Transport::connect(&params) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = bus.publish(AppEvent::Connection(ConnectionEvent::ConnectionFailed {
                    port,
                    error: e.to_string(),
                }));
                return Err(e.into());
            }
        }
    };

    let _ = bus.publish(AppEvent::Connection(ConnectionEvent::Connected {
        port: transport.name().to_string(),
    }));
    let session = Arc::new(SessionCoordinator::new(
        Arc::new(transport),
        Arc::new(DeviceTracker::new()),
        bus,
        config,
    ));
    session.spawn_dispatch(events);
    Ok(session)
}

async fn run_protocol(
    config: Config,
    link: &LinkArgs,
    protocol: &str,
    params: &ProtocolParams,
) -> anyhow::Result<()> {
    let session = open_session(config, link)?;
    let outcome = drive(&session, protocol, params).await;
    session.disconnect().await;
    let (protocol, outcome) = outcome?;

    match outcome {
        RunOutcome::Completed => {
            println!("Protocol {} completed", protocol);
            Ok(())
        }
        RunOutcome::Cancelled => {
            println!("Protocol {} cancelled", protocol);
            Ok(())
        }
        RunOutcome::Faulted { reason } => bail!("protocol {} faulted: {}", protocol, reason),
    }
}

/// Initialize the rig, run one protocol, stop it on Ctrl-C
async fn drive(
    session: &SessionCoordinator,
    protocol: &str,
    params: &ProtocolParams,
) -> anyhow::Result<(String, RunOutcome)> {
    session
        .initialize_device()
        .await
        .context("initializing the rig")?;

    let handle = session.start(protocol, params)?;
    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping the rig");
            session.emergency_stop().await?.unwrap_or(RunOutcome::Cancelled)
        }
    };
    Ok((handle.protocol, outcome))
}

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use wardrive_core::ports::ADAPTER_POLL;
use wardrive_core::{
    open_labeler, open_store, AlwaysGranted, Capability, CapabilityGate, Config,
    ControllerSettings, ObservationRecorder, Pipeline, PipelineParts, PositionSource,
    PositionSourceConfig, ScanSource, ScanSourceConfig, StoreLock,
};

#[cfg(target_os = "linux")]
use wardrive_os_linux as os;

mod command;
mod sim;

use command::Command;

#[derive(Parser, Debug)]
#[command(name = "wardrive", about = "Record wireless networks against position fixes")]
struct Args {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Start tracking immediately, as if autoStart were set
    #[arg(long)]
    start: bool,

    /// Do not read commands from stdin; run until the pipeline stops
    #[arg(long)]
    daemon: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let _lock = StoreLock::acquire(&cfg.store_path())?;
    let store = open_store(&cfg).with_context(|| format!("opening {}", cfg.store_path().display()))?;
    let labeler = open_labeler(&cfg).context("loading gazetteer")?;
    let recorder = Arc::new(ObservationRecorder::open(store, labeler)?);

    println!("wardrive running");
    println!("  store:     {} ({:?})", cfg.store_path().display(), cfg.store_kind);
    println!("  interval:  {}ms", cfg.interval_ms);
    println!("  stored:    {}", recorder.current_count());

    let parts = build_parts(&cfg, recorder)?;
    let pipeline = Pipeline::spawn(parts);
    pipeline.refresh()?;
    if cfg.auto_start || args.start {
        pipeline.activate()?;
    }

    if args.daemon {
        return pipeline.join().map_err(Into::into);
    }
    println!("{}", command::HELP);
    command_loop(pipeline)
}

fn command_loop(pipeline: Pipeline) -> anyhow::Result<()> {
    let lines = spawn_stdin_reader();
    loop {
        if !pipeline.is_running() {
            return pipeline.join().map_err(Into::into);
        }
        let line = match lines.recv_timeout(ADAPTER_POLL) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        match command::parse(&line) {
            Some(Command::Start) => pipeline.activate()?,
            Some(Command::Stop) => pipeline.deactivate()?,
            Some(Command::Refresh) => pipeline.refresh()?,
            Some(Command::Clear) => match pipeline.clear() {
                Ok(()) => println!("[ok] cleared"),
                Err(err) => eprintln!("[!!] clear failed: {err}"),
            },
            Some(Command::Count) => println!("{}", pipeline.stored_count()),
            Some(Command::Status) => println!("{}", pipeline.status()),
            Some(Command::Help) => println!("{}", command::HELP),
            Some(Command::Quit) => break,
            None => eprintln!("[!!] unknown command {:?}; {}", line.trim(), command::HELP),
        }
    }
    info!("shutting down");
    pipeline.shutdown().map_err(Into::into)
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn build_parts(cfg: &Config, recorder: Arc<ObservationRecorder>) -> anyhow::Result<PipelineParts> {
    let position_source = position_source(cfg)?;
    let scan_source = scan_source(cfg)?;
    let gate = capability_gate(cfg)?;
    info!(
        position = position_source.name(),
        scan = scan_source.name(),
        "adapters ready"
    );
    Ok(PipelineParts {
        position_source,
        scan_source,
        gate,
        recorder,
        settings: ControllerSettings {
            interval: cfg.interval(),
            priority: cfg.priority,
            required: required_capabilities(cfg),
        },
    })
}

fn required_capabilities(cfg: &Config) -> Vec<Capability> {
    match cfg.scan_source {
        ScanSourceConfig::Iw { .. } => Capability::required(cfg.scan_source.triggers_scans()),
        ScanSourceConfig::Simulated { .. } => vec![Capability::PositionAccess],
    }
}

fn position_source(cfg: &Config) -> anyhow::Result<Box<dyn PositionSource>> {
    match &cfg.position_source {
        PositionSourceConfig::Simulated {
            start_lat,
            start_lon,
            step_m,
            seed,
        } => Ok(Box::new(sim::SimulatedPosition::new(
            *start_lat, *start_lon, *step_m, *seed,
        ))),
        PositionSourceConfig::Gpsd {
            host,
            port,
            connect_timeout_ms,
        } => gpsd_source(host, *port, Duration::from_millis(*connect_timeout_ms)),
    }
}

fn scan_source(cfg: &Config) -> anyhow::Result<Box<dyn ScanSource>> {
    match &cfg.scan_source {
        ScanSourceConfig::Simulated { networks, seed } => {
            Ok(Box::new(sim::SimulatedScanner::new(*networks, *seed)))
        }
        ScanSourceConfig::Iw {
            interface,
            use_cached,
        } => iw_scanner(interface.as_deref(), *use_cached),
    }
}

#[cfg(target_os = "linux")]
fn gpsd_source(host: &str, port: u16, timeout: Duration) -> anyhow::Result<Box<dyn PositionSource>> {
    Ok(Box::new(os::GpsdSource::new(host, port, timeout)?))
}

#[cfg(not(target_os = "linux"))]
fn gpsd_source(_host: &str, _port: u16, _timeout: Duration) -> anyhow::Result<Box<dyn PositionSource>> {
    bail!("gpsd positions are only supported on Linux; use a simulated position source")
}

#[cfg(target_os = "linux")]
fn iw_scanner(interface: Option<&str>, use_cached: bool) -> anyhow::Result<Box<dyn ScanSource>> {
    let iface = match interface {
        Some(iface) => iface.to_string(),
        None => match os::default_wireless_interface() {
            Some(iface) => iface,
            None => bail!("no wireless interface found; set scanSource.interface"),
        },
    };
    let scanner = os::IwScanner::new(iface, use_cached);
    info!(interface = scanner.interface(), cached = use_cached, "scanning with iw");
    Ok(Box::new(scanner))
}

#[cfg(not(target_os = "linux"))]
fn iw_scanner(_interface: Option<&str>, _use_cached: bool) -> anyhow::Result<Box<dyn ScanSource>> {
    bail!("iw scanning is only supported on Linux; use a simulated scan source")
}

#[cfg(target_os = "linux")]
fn capability_gate(cfg: &Config) -> anyhow::Result<Box<dyn CapabilityGate>> {
    let simulated = matches!(cfg.position_source, PositionSourceConfig::Simulated { .. })
        && matches!(cfg.scan_source, ScanSourceConfig::Simulated { .. });
    if simulated {
        return Ok(Box::new(AlwaysGranted));
    }
    let gpsd_addr = match &cfg.position_source {
        PositionSourceConfig::Gpsd { host, port, connect_timeout_ms } => Some(
            os::GpsdSource::new(host, *port, Duration::from_millis(*connect_timeout_ms))?.addr(),
        ),
        PositionSourceConfig::Simulated { .. } => None,
    };
    Ok(Box::new(os::LinuxCapabilities::new(gpsd_addr)))
}

#[cfg(not(target_os = "linux"))]
fn capability_gate(_cfg: &Config) -> anyhow::Result<Box<dyn CapabilityGate>> {
    Ok(Box::new(AlwaysGranted))
}

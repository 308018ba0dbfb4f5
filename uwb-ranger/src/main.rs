//! Phone-side UWB ranging tool
//!
//! Finds a UWB peripheral over BLE, negotiates a ranging session through the
//! OoB protocol and prints the measurements it reports.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::warn;
use tokio::sync::mpsc;
use uwb_ble::BleTransport;
use uwb_session::{
    Measurement, SessionConfig, SessionController, SessionEvent, SessionState, SimulatedEngine,
    Transport, ranger_home,
};

#[derive(Parser)]
#[command(name = "uwb-ranger")]
#[command(about = "Range against a UWB device negotiated over BLE")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Connect to a device and range until Ctrl-C
    Range {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Stop after this many seconds
        #[arg(short = 't', long)]
        duration: Option<u64>,
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        scan: u64,
        /// Config directory (default: $UWB_RANGER_HOME or ~/.uwb-ranger)
        #[arg(long)]
        home: Option<PathBuf>,
    },
    /// Print the session config, creating it with defaults if missing
    Config {
        #[arg(long)]
        home: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Scan { duration } => scan_devices(duration).await?,
        Commands::Range {
            device,
            duration,
            scan,
            home,
        } => range(device, duration, scan, home).await?,
        Commands::Config { home } => show_config(home)?,
    }

    Ok(())
}

fn load_config(home: Option<PathBuf>) -> Result<(PathBuf, SessionConfig), Box<dyn std::error::Error>> {
    let home = match home {
        Some(dir) => dir,
        None => ranger_home()?,
    };
    let config = SessionConfig::load_or_create(&home)?;
    Ok((home, config))
}

fn show_config(home: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let (home, config) = load_config(home)?;
    println!("{}", home.join("config.json").display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for UWB devices ({} seconds)...", duration);

    let devices = uwb_ble::scan(duration).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.has_oob_service { " [UWB]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }

    Ok(())
}

async fn range(
    target: Option<String>,
    duration: Option<u64>,
    scan_secs: u64,
    home: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = load_config(home)?;

    println!("Scanning for UWB devices...");
    let (transport, link_events) = BleTransport::find(target.as_deref(), scan_secs).await?;
    println!("Found device: {}", transport.name());
    let transport = Arc::new(transport);

    let (listener, mut events) = mpsc::unbounded_channel();
    let (controller, handle) = SessionController::new(
        Arc::clone(&transport),
        SimulatedEngine::default(),
        listener,
        config,
    )?;
    let actor = tokio::spawn(controller.run());
    let forward = handle.forward_transport_events(link_events);

    println!("Connecting...");
    transport.connect().await?;

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if !report(event) {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => break,
            _ = &mut deadline => break,
        }
    }

    if let Err(e) = handle.stop_ranging().await {
        warn!("stop failed: {e}");
    }
    if let Err(e) = transport.disconnect().await {
        warn!("disconnect failed: {e}");
    }

    forward.abort();
    drop(handle);
    actor.await?;
    Ok(())
}

/// Print one session event. Returns false once the session is over.
fn report(event: SessionEvent) -> bool {
    match event {
        SessionEvent::Connected(peer) => println!("Connected to {peer}"),
        SessionEvent::Disconnected => {
            println!("Disconnected");
            return false;
        }
        SessionEvent::StateChanged(SessionState::Stopped) => {
            println!("Ranging stopped");
            return false;
        }
        SessionEvent::StateChanged(state) => log::debug!("state: {state:?}"),
        SessionEvent::RangingStarted(phone) => println!(
            "Ranging started: session {:#010x}, channel {}, preamble {}, role {}",
            phone.session_id, phone.channel, phone.preamble_id, phone.ranging_role
        ),
        SessionEvent::RangingResult(Measurement::Distance(m)) => println!("  distance {m:.2} m"),
        SessionEvent::RangingResult(Measurement::Azimuth(deg)) => {
            println!("  azimuth  {deg:.1}°")
        }
        SessionEvent::RangingError(reason) => println!("Ranging error: {reason}"),
        SessionEvent::RangingComplete => {
            println!("Ranging complete");
            return false;
        }
        SessionEvent::NegotiationFailed(err) => {
            println!("Negotiation failed: {err}");
            return false;
        }
    }
    true
}

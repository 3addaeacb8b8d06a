use anyhow::{Context, Result};
use beaconwatch::adapter::Adapter;
use beaconwatch::config::{Config, OutputFormat};
use beaconwatch::replay::{replay, ReplayAdapter, ReplayOptions};
use beaconwatch::report::Reporter;
use beaconwatch::scanner::Scanner;
use beaconwatch::signal::{self, Proximity, ReferencePower};
use beaconwatch::swarm::Swarm;
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "beaconwatch")]
#[command(version)]
#[command(about = "Live distance estimates to nearby BLE beacons")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "beaconwatch.json")]
    config: PathBuf,

    /// Manufacturer data to filter by, as a hex substring (overrides config)
    #[arg(short, long, env = "BEACONWATCH_FILTER")]
    filter: Option<String>,

    /// Reference signal strength at 1 meter in dBm (overrides config)
    #[arg(long, allow_hyphen_values = true)]
    reference_power: Option<i32>,

    /// Emit JSON lines instead of text (overrides config)
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan live with the local Bluetooth adapter
    Scan,

    /// Replay a recorded JSON Lines discovery feed ("-" reads stdin)
    Replay {
        input: PathBuf,

        /// Pause between feed events, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Convert a single signal reading to distance and accuracy
    Distance {
        /// Received signal strength in dBm
        #[arg(long, allow_hyphen_values = true)]
        rssi: i32,
    },

    /// Write a default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    // Handle init command before loading config
    if matches!(cli.command, Commands::Init) {
        return handle_init(&cli.config);
    }

    // Load configuration
    let mut config = if cli.config.exists() {
        Config::load(&cli.config).context("Failed to load config")?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Override config with CLI args
    if let Some(filter) = cli.filter {
        config.scan.filter = filter;
    }
    if let Some(reference_power) = cli.reference_power {
        config.signal.reference_power = reference_power;
    }
    if cli.json {
        config.output.format = OutputFormat::Json;
    }
    config.validate()?;

    match cli.command {
        Commands::Scan => handle_scan(config).await,
        Commands::Replay { input, delay_ms } => handle_replay(config, input, delay_ms).await,
        Commands::Distance { rssi } => handle_distance(&config, rssi),
        Commands::Init => unreachable!(),
    }
}

/// Everything a scan session needs, wired the same way for every adapter
struct Session<A: Adapter> {
    scanner: Scanner<A>,
    swarm: Swarm,
    reporter: Arc<Reporter<io::Stdout>>,
    running: Arc<AtomicBool>,
}

impl<A: Adapter> Session<A> {
    fn new(config: &Config, adapter: A) -> Result<Self> {
        let settings = config.signal.device_settings()?;
        let scanner = Scanner::new(adapter, &config.scan.filter, settings);
        let swarm = Swarm::new();
        let reporter = Arc::new(Reporter::stdout(config.output.format));
        let running = Arc::new(AtomicBool::new(true));

        // Adapter errors end the session instead of aborting the process
        let r = running.clone();
        scanner.on_error(move |err| {
            error!("{}", err);
            r.store(false, Ordering::SeqCst);
        });

        if config.output.show_new_devices {
            let rep = reporter.clone();
            scanner.on_new_device_scanned(move |device| rep.new_device(device));
        }

        let sw = swarm.clone();
        scanner.on_new_device_scanned(move |device| {
            sw.add_device(device);
        });

        let rep = reporter.clone();
        let weak = swarm.downgrade();
        swarm.on_location_update(move || {
            if let Some(swarm) = weak.upgrade() {
                rep.location_update(&swarm);
            }
        });

        if !config.scan.filter.is_empty() {
            info!("Filtering manufacturer data by {:?}", scanner.filter().as_str());
        }

        Ok(Session {
            scanner,
            swarm,
            reporter,
            running,
        })
    }

    fn install_ctrlc(&self) -> Result<()> {
        let r = self.running.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived Ctrl+C, stopping...");
            r.store(false, Ordering::SeqCst);
        })?;
        Ok(())
    }

    fn finish(self) {
        self.scanner.shutdown();
        self.reporter.summary(&self.swarm);
    }
}

async fn handle_replay(config: Config, input: PathBuf, delay_ms: Option<u64>) -> Result<()> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&input)
            .with_context(|| format!("Failed to open feed: {:?}", input))?;
        Box::new(BufReader::new(file))
    };

    let session = Session::new(&config, Arc::new(ReplayAdapter::new()))?;
    session.install_ctrlc()?;

    let options = ReplayOptions {
        delay: delay_ms.map(Duration::from_millis),
    };
    let stats = replay(reader, &session.scanner, &options, session.running.clone())
        .await
        .context("Replay failed")?;

    info!(
        "Replay done: {} lines, {} new devices, {} updates, {} filtered, {} skipped, {} malformed",
        stats.lines,
        stats.new_devices,
        stats.updates,
        stats.filtered,
        stats.skipped,
        stats.malformed
    );
    session.finish();
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn handle_scan(config: Config) -> Result<()> {
    let (adapter, driver) = beaconwatch::bluez::connect()
        .await
        .context("Failed to open Bluetooth adapter")?;

    let session = Session::new(&config, adapter)?;
    session.install_ctrlc()?;

    info!("Scanning. Press Ctrl+C to stop.");
    driver
        .run(&session.scanner, session.running.clone())
        .await
        .context("Bluetooth scan failed")?;

    session.finish();
    Ok(())
}

#[cfg(not(feature = "bluetooth"))]
async fn handle_scan(_config: Config) -> Result<()> {
    anyhow::bail!(
        "beaconwatch was built without Bluetooth support. \
        Rebuild with `--features bluetooth`, or use `beaconwatch replay` with a recorded feed."
    )
}

fn handle_distance(config: &Config, rssi: i32) -> Result<()> {
    let reference = ReferencePower::new(config.signal.reference_power)?;
    let distance = signal::distance(rssi, reference);
    let accuracy = signal::accuracy(rssi, reference);

    println!("RSSI:            {} dBm", rssi);
    println!("Reference power: {}", reference);
    println!("Distance:        {} ({})", distance, Proximity::from_distance(distance));
    if accuracy == signal::UNDETERMINED_ACCURACY {
        println!("Accuracy:        undetermined");
    } else {
        println!("Accuracy:        {:.4}", accuracy);
    }
    Ok(())
}

fn handle_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{:?} already exists, not overwriting", path);
    }

    Config::default().save(path)?;
    info!("Created {:?}", path);
    info!("Edit it to set a filter, then run 'beaconwatch scan' or 'beaconwatch replay <feed>'.");
    Ok(())
}

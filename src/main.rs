//! Binary entrypoint for the glacier-logger CLI.
//!
//! Commands:
//! - `run [--port <path>] [--replay <file>]` - run the duty-cycled logger
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status [--last N]` - print the configuration summary and recent sessions
//! - `inspect <file>` - re-parse a logged session file and print message counts as JSON
//!
//! See the library crate docs for module-level details: `glacier_logger::`.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use glacier_logger::config::Config;
use glacier_logger::duty::events::EventFlags;
use glacier_logger::duty::{ControllerSettings, DutyCycleController, Peripherals, Shutdown};
use glacier_logger::hal::file_storage::FileStorage;
use glacier_logger::hal::host::{run_ticker, HostPlatform, SoftRtc, SoftWatchdog, RESTART_EXIT_CODE};
use glacier_logger::hal::replay::ReplayTransport;
use glacier_logger::hal::Transport;
use glacier_logger::ubx::message_name;
use glacier_logger::ubx::parser::{Feed, FrameParser};

#[derive(Parser)]
#[command(name = "glacier-logger")]
#[command(about = "Unattended duty-cycled GNSS raw data logger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the logger
    Run {
        /// Receiver serial port (overrides config)
        #[arg(short, long)]
        port: Option<String>,

        /// Replay a captured UBX file instead of opening the receiver
        #[arg(long, conflicts_with = "port")]
        replay: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show configuration and recent sessions
    Status {
        /// Number of sessions to list
        #[arg(short, long, default_value_t = 10)]
        last: usize,
    },
    /// Re-parse a logged session file
    Inspect {
        /// Path to a .ubx session file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Run { port, replay } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            config.validate()?;
            info!("Starting glacier-logger v{}", env!("CARGO_PKG_VERSION"));
            let transport: Box<dyn Transport + Send> = match replay {
                Some(path) => {
                    info!("Replaying {}", path);
                    Box::new(ReplayTransport::from_file(&path, config.receiver.bytes_per_poll)?)
                }
                None => {
                    let port = port.unwrap_or_else(|| config.receiver.port.clone());
                    open_receiver(&port, config.receiver.baud_rate)?
                }
            };
            let outcome = run_logger(config, transport).await?;
            match outcome {
                Shutdown::Halted => info!("Logger halted"),
                Shutdown::Restart => std::process::exit(RESTART_EXIT_CODE),
            }
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            let cfg = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            info!("Configuration file created at {}", cli.config);
            info!("Data directory {}", cfg.storage.data_dir);
        }
        Commands::Status { last } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            show_status(&config, last)?;
        }
        Commands::Inspect { file } => {
            let report = inspect(&file).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn run_logger(config: Config, transport: Box<dyn Transport + Send>) -> Result<Shutdown> {
    let events = Arc::new(EventFlags::new());
    let rtc = SoftRtc::new();
    let watchdog = SoftWatchdog::new(config.watchdog.max_interrupts);
    let ticker_stop = Arc::new(AtomicBool::new(false));
    let ticker = tokio::spawn(run_ticker(
        rtc.clone(),
        watchdog.clone(),
        Arc::clone(&events),
        Duration::from_millis(100),
        Arc::clone(&ticker_stop),
    ));

    let stop_flags = Arc::clone(&events);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current iteration");
            stop_flags.raise_stop();
        }
    });

    let hw = Peripherals {
        transport,
        storage: FileStorage::new(&config.storage.data_dir),
        rtc,
        watchdog,
        platform: HostPlatform::new(),
    };
    let mut controller =
        DutyCycleController::new(ControllerSettings::from_config(&config), hw, events);
    let outcome = tokio::task::spawn_blocking(move || controller.run()).await?;

    ticker_stop.store(true, Ordering::Release);
    if let Err(e) = ticker.await {
        warn!("Ticker task ended abnormally: {}", e);
    }
    Ok(outcome)
}

#[cfg(feature = "serial")]
fn open_receiver(port: &str, baud_rate: u32) -> Result<Box<dyn Transport + Send>> {
    let transport = glacier_logger::hal::serial::SerialTransport::open(port, baud_rate)?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "serial"))]
fn open_receiver(port: &str, _baud_rate: u32) -> Result<Box<dyn Transport + Send>> {
    Err(anyhow!(
        "cannot open {}: built without the 'serial' feature (use --replay)",
        port
    ))
}

fn show_status(config: &Config, last: usize) -> Result<()> {
    println!("glacier-logger v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Receiver: {} @ {} baud, measurement every {} ms",
        config.receiver.port, config.receiver.baud_rate, config.receiver.measurement_interval_ms
    );
    println!("Schedule: {}", config.schedule.description());
    println!("Data directory: {}", config.storage.data_dir);
    for msg in config.capacity_warning().into_iter().chain(config.poll_warning()) {
        println!("Warning: {}", msg);
    }

    let sessions = FileStorage::new(&config.storage.data_dir).read_journal()?;
    println!("Sessions journaled: {}", sessions.len());
    let skip = sessions.len().saturating_sub(last);
    for s in &sessions[skip..] {
        println!("  {}", s.brief());
    }
    Ok(())
}

async fn inspect(path: &str) -> Result<serde_json::Value> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {}", path, e))?;
    let mut parser = FrameParser::new();
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut frames = 0u64;
    let mut invalid = 0u64;
    for &b in &data {
        match parser.feed(b) {
            Feed::FrameReady(frame) => {
                frames += 1;
                *counts
                    .entry(message_name(frame.class(), frame.id()))
                    .or_default() += 1;
            }
            Feed::Invalid(_) => invalid += 1,
            Feed::Incomplete => {}
        }
    }
    Ok(serde_json::json!({
        "file": path,
        "bytes": data.len(),
        "frames": frames,
        "invalid": invalid,
        "noise_bytes": parser.noise_bytes(),
        "trailing_bytes": parser.pending_len(),
        "messages": counts,
    }))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Unattended runs have stdout redirected; only echo to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

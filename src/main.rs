//! CLI Entry Point for flicker_daq
//!
//! Drives the flicker rig controller from the command line:
//! - List serial ports
//! - Read the two sensor channels
//! - Switch the magnet and the AC supply
//! - Monitor everything the controller sends
//!
//! # Usage
//!
//! ```bash
//! flicker_daq ports
//! flicker_daq --port /dev/ttyACM0 read --count 10 --interval-ms 200
//! flicker_daq magnet on
//! flicker_daq monitor --duration-secs 30
//! ```
//!
//! Without `--port` (or `serial.port` in the config file) the ports are
//! enumerated and you are asked to pick one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use flicker_daq::config::{Config, LogFormat, DEFAULT_CONFIG_PATH};
use flicker_daq::discovery::available_ports;
use flicker_daq::logging;
use flicker_daq::{Device, DeviceError, DeviceResult, PortCandidate, PortSelector};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "flicker_daq")]
#[command(about = "Serial control for the flicker rig controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port to open (skips the selection prompt)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate override
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format override (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Print readings as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Read the sensor channels
    Read {
        /// Number of readings
        #[arg(long, default_value = "1")]
        count: u32,

        /// Delay between readings
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },

    /// Switch the magnet
    Magnet {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Switch the AC supply
    Ac {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Print every response, reading and stream error until Ctrl+C
    Monitor {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(port) = &cli.port {
        config.serial.port = Some(port.clone());
    }
    config.validate()?;

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Read { count, interval_ms } => {
            let device = connect(&config).await?;
            let result = read_loop(&device, count, Duration::from_millis(interval_ms), cli.json).await;
            device.close().await?;
            result
        }
        Commands::Magnet { state } => {
            let device = connect(&config).await?;
            let result = match state {
                Switch::On => device.magnet_on().await,
                Switch::Off => device.magnet_off().await,
            };
            device.close().await?;
            result?;
            println!("✅ Magnet {}", state.label());
            Ok(())
        }
        Commands::Ac { state } => {
            let device = connect(&config).await?;
            let result = match state {
                Switch::On => device.ac_on().await,
                Switch::Off => device.ac_off().await,
            };
            device.close().await?;
            result?;
            println!("✅ AC {}", state.label());
            Ok(())
        }
        Commands::Monitor { duration_secs } => {
            let device = connect(&config).await?;
            let result = monitor(&device, duration_secs.map(Duration::from_secs), cli.json).await;
            device.close().await?;
            result
        }
    }
}

impl Switch {
    fn label(self) -> &'static str {
        match self {
            Switch::On => "on",
            Switch::Off => "off",
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("⚠️  No serial ports found");
        return Ok(());
    }
    println!("🔌 Serial ports:");
    for port in ports {
        println!("   {}", port);
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<Device> {
    let device = Device::new(config)?;
    match &config.serial.port {
        Some(path) => device
            .open(path)
            .await
            .with_context(|| format!("opening {}", path))?,
        None => {
            let chosen = device.initialize(&PromptSelector).await?;
            println!("🔌 Using {}", chosen);
        }
    }
    Ok(device)
}

async fn read_loop(device: &Device, count: u32, interval: Duration, json: bool) -> Result<()> {
    for i in 0..count {
        if i > 0 {
            tokio::time::sleep(interval).await;
        }
        let reading = device.read_sensor().await?;
        if json {
            println!("{}", serde_json::to_string(&reading)?);
        } else {
            println!("📈 {:>10.4} {:>10.4}", reading.value1, reading.value2);
        }
    }
    Ok(())
}

async fn monitor(device: &Device, duration: Option<Duration>, json: bool) -> Result<()> {
    let mut responses = device.subscribe_responses();
    let mut readings = device.subscribe_readings();
    let mut faults = device.subscribe_errors();

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    println!("📡 Monitoring - Press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            reading = readings.recv() => match reading {
                Ok(reading) if json => println!("{}", serde_json::to_string(&reading)?),
                Ok(reading) => println!("📈 {:>10.4} {:>10.4}", reading.value1, reading.value2),
                Err(RecvError::Lagged(n)) => eprintln!("⚠️  skipped {} readings", n),
                Err(RecvError::Closed) => break,
            },
            line = responses.recv() => match line {
                // Readings are shown above; only print unstructured lines here.
                Ok(line) if flicker_daq::SensorReading::parse(&line).is_none() => {
                    println!("💬 {}", line);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => eprintln!("⚠️  skipped {} responses", n),
                Err(RecvError::Closed) => break,
            },
            fault = faults.recv() => match fault {
                Ok(fault) => {
                    eprintln!("❌ {}", fault);
                    break;
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
    println!("\n👋 Monitor stopped");
    Ok(())
}

/// Asks on the terminal which port to use.
struct PromptSelector;

#[async_trait]
impl PortSelector for PromptSelector {
    async fn select(&self, candidates: &[PortCandidate]) -> DeviceResult<PortCandidate> {
        match candidates {
            [] => return Err(DeviceError::NoPorts),
            [only] => return Ok(only.clone()),
            _ => {}
        }

        println!("🔌 Select a serial port:");
        for (i, candidate) in candidates.iter().enumerate() {
            println!("   [{}] {}", i + 1, candidate);
        }
        print!("Port number [1]: ");
        std::io::stdout()
            .flush()
            .map_err(|e| DeviceError::InvalidSelection(e.to_string()))?;

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| DeviceError::InvalidSelection(e.to_string()))?
        .map_err(|e| DeviceError::InvalidSelection(e.to_string()))?;

        let answer = line.trim();
        let index = if answer.is_empty() {
            1
        } else {
            answer
                .parse::<usize>()
                .map_err(|_| DeviceError::InvalidSelection(format!("not a number: {}", answer)))?
        };

        index
            .checked_sub(1)
            .and_then(|i| candidates.get(i))
            .cloned()
            .ok_or_else(|| DeviceError::InvalidSelection(format!("no port numbered {}", index)))
    }
}

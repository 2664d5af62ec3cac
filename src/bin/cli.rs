//! rtkbase CLI - command-line interface
//!
//! Monitors, configures and inspects a u-blox receiver acting as an RTK
//! reference station.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rtkbase_core::cli::{print_exit_codes, CliResult, ExitCodes};
use rtkbase_core::config::{self, StationConfig};
use rtkbase_core::core::base_config::fixed_base_commands;
use rtkbase_core::core::engine::{Engine, EngineEvent};
use rtkbase_core::core::geo::Coordinate;
use rtkbase_core::core::logger::CaptureFormat;
use rtkbase_core::core::protocol::nmea::build_sentence;
use rtkbase_core::core::protocol::ubx::{self, cfg, class, mon, PortId, PortRates, ResetMode, ResetType};
use rtkbase_core::core::protocol::{calc_checksum, rtcm3, ChecksumType, Protocol, UbxGenerator};
use rtkbase_core::core::scheduler::PollEntry;
use rtkbase_core::core::station::Station;
use rtkbase_core::core::transport::{list_ports, SerialTransport};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
    /// Hex dump
    Hex,
}

/// rtkbase CLI
#[derive(Parser, Debug)]
#[command(
    name = "rtkbase",
    version,
    about = "u-blox RTK base station engine",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "RTKBASE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Serial port overrides
#[derive(Args, Debug, Clone, Default)]
struct SerialArgs {
    /// Serial port name (e.g. /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Decode the receiver stream and print each frame
    Monitor {
        #[command(flatten)]
        serial: SerialArgs,

        /// Capture frames to the configured capture directory
        #[arg(long)]
        capture: bool,

        /// Capture file format
        #[arg(long, value_enum)]
        capture_format: Option<CaptureFormatArg>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Poll MON-VER and CFG-TMODE3 periodically
        #[arg(long)]
        poll: bool,
    },

    /// Replay a capture file through the engine and print what it holds
    Decode {
        /// Raw capture file
        file: PathBuf,

        /// Bytes fed to the engine per read
        #[arg(long, default_value = "512")]
        chunk: usize,
    },

    /// Print a generated command frame
    Generate {
        #[command(subcommand)]
        command: GenerateCommand,
    },

    /// Send the fixed-base configuration sequence
    ConfigureBase {
        #[command(subcommand)]
        action: Option<BaseAction>,

        #[command(flatten)]
        serial: SerialArgs,

        /// Use MSM7 instead of MSM4 observations
        #[arg(long)]
        msm7: bool,

        /// Store the configuration in receiver flash afterwards
        #[arg(long)]
        save: bool,

        /// Keep monitoring after configuring
        #[arg(long)]
        follow: bool,
    },

    /// Start a survey-in
    SurveyIn {
        #[command(flatten)]
        serial: SerialArgs,

        /// Minimum duration (s)
        #[arg(long, default_value_t = 60)]
        duration: u32,

        /// Accuracy limit (m)
        #[arg(long, default_value_t = 5.0)]
        accuracy: f64,

        /// Print the frame instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Put the receiver in fixed mode at a known position
    Fixed {
        #[command(flatten)]
        serial: SerialArgs,

        /// ECEF X (m) or latitude
        #[arg(allow_hyphen_values = true)]
        x: String,

        /// ECEF Y (m) or longitude
        #[arg(allow_hyphen_values = true)]
        y: String,

        /// ECEF Z (m) or altitude (m)
        #[arg(allow_hyphen_values = true, default_value = "")]
        z: String,

        /// Position accuracy (m)
        #[arg(long, default_value_t = 0.1)]
        accuracy: f64,

        /// Print the coordinate and frame instead of sending
        #[arg(long)]
        dry_run: bool,
    },

    /// Checksum of hex data as it would appear on the wire
    Checksum {
        #[arg(value_enum)]
        algorithm: ChecksumArg,

        /// Hex data (spaces allowed)
        data: String,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum BaseAction {
    /// Print the sequence instead of sending it
    Show,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path
    Path,
}

#[derive(Subcommand, Debug)]
enum GenerateCommand {
    /// Poll any message (empty payload)
    Poll {
        #[arg(value_parser = parse_byte)]
        class: u8,
        #[arg(value_parser = parse_byte)]
        id: u8,
    },
    /// Restore factory defaults
    ResetDefaults,
    /// Reload the configuration stored in flash
    RevertSaved,
    /// Store the current configuration
    SaveConfig,
    /// Reset the receiver
    Reboot {
        #[arg(long, value_enum, default_value_t = ResetTypeArg::Hot)]
        reset_type: ResetTypeArg,
        #[arg(long, value_enum, default_value_t = ResetModeArg::ControlledGnssOnly)]
        mode: ResetModeArg,
    },
    /// Poll CFG-PRT for a port
    PollPort {
        #[arg(value_enum)]
        port: PortArg,
    },
    /// Poll the output rates of a message
    PollMsgRate {
        #[arg(value_parser = parse_byte)]
        class: u8,
        #[arg(value_parser = parse_byte)]
        id: u8,
    },
    /// Configure a port for UBX, NMEA and RTCM 3
    ConfigPort {
        #[arg(value_enum)]
        port: PortArg,
        #[arg(long, default_value_t = 115200)]
        baud: u32,
    },
    /// Navigation measurement period
    Rate {
        #[arg(default_value_t = 1000)]
        ms: u16,
    },
    /// Stationary dynamic model
    NavStationary {
        /// Leave differential corrections disabled
        #[arg(long)]
        no_dgnss: bool,
    },
    /// Disable time mode
    DisableTmode3,
    /// Set a message's output rate on every port
    MsgRate {
        #[arg(value_parser = parse_byte)]
        class: u8,
        #[arg(value_parser = parse_byte)]
        id: u8,
        rate: u8,
    },
    /// Disable a message on every port
    TurnOff {
        #[arg(value_parser = parse_byte)]
        class: u8,
        #[arg(value_parser = parse_byte)]
        id: u8,
    },
    /// NMEA sentence with checksum from its body (without `$`)
    Nmea { body: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CaptureFormatArg {
    Raw,
    Hex,
    Jsonl,
}

impl From<CaptureFormatArg> for CaptureFormat {
    fn from(arg: CaptureFormatArg) -> Self {
        match arg {
            CaptureFormatArg::Raw => CaptureFormat::Raw,
            CaptureFormatArg::Hex => CaptureFormat::Hex,
            CaptureFormatArg::Jsonl => CaptureFormat::JsonLines,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResetTypeArg {
    Hot,
    Warm,
    Cold,
}

impl From<ResetTypeArg> for ResetType {
    fn from(arg: ResetTypeArg) -> Self {
        match arg {
            ResetTypeArg::Hot => ResetType::Hot,
            ResetTypeArg::Warm => ResetType::Warm,
            ResetTypeArg::Cold => ResetType::Cold,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResetModeArg {
    ForcedHw,
    Controlled,
    ControlledGnssOnly,
    ControlledHw,
}

impl From<ResetModeArg> for ResetMode {
    fn from(arg: ResetModeArg) -> Self {
        match arg {
            ResetModeArg::ForcedHw => ResetMode::ForcedHw,
            ResetModeArg::Controlled => ResetMode::Controlled,
            ResetModeArg::ControlledGnssOnly => ResetMode::ControlledGnssOnly,
            ResetModeArg::ControlledHw => ResetMode::ControlledHw,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PortArg {
    I2c,
    Uart1,
    Uart2,
    Usb,
    Spi,
}

impl From<PortArg> for PortId {
    fn from(arg: PortArg) -> Self {
        match arg {
            PortArg::I2c => PortId::I2c,
            PortArg::Uart1 => PortId::Uart1,
            PortArg::Uart2 => PortId::Uart2,
            PortArg::Usb => PortId::Usb,
            PortArg::Spi => PortId::Spi,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChecksumArg {
    Ubx,
    Crc24q,
    Nmea,
}

impl From<ChecksumArg> for ChecksumType {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Ubx => ChecksumType::UbxFletcher,
            ChecksumArg::Crc24q => ChecksumType::Crc24q,
            ChecksumArg::Nmea => ChecksumType::NmeaXor,
        }
    }
}

/// Accepts `0x06`, `06h` style hex or plain decimal
fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix('h') {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", s, e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::from(ExitCodes::INTERNAL_ERROR);
        }
    };

    let result = match runtime.block_on(run(&cli)) {
        Ok(result) => result,
        Err(e) => CliResult::from_anyhow(&e),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                eprintln!("{}", msg);
            }
        } else {
            eprintln!("Error: {}", msg);
        }
    }
    result.to_exit_code()
}

/// Console logging on stderr plus an optional daily rolling file
fn init_logging(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "rtkbase.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::ListPorts { detailed } => show_ports(cli, *detailed),
        Commands::Monitor {
            serial,
            capture,
            capture_format,
            duration,
            poll,
        } => {
            let mut config = load_config(cli, serial)?;
            config.capture.enabled |= *capture;
            if let Some(format) = capture_format {
                config.capture.format = (*format).into();
            }
            if config.capture.enabled && config.capture.directory.is_relative() {
                if let Some(dir) = config::capture_dir() {
                    config.capture.directory = dir.join(&config.capture.directory);
                }
            }
            if *poll {
                config.poll.entries.push(PollEntry::new(class::MON, mon::VER));
                config.poll.entries.push(PollEntry::new(class::CFG, cfg::TMODE3));
            }
            monitor(cli, &config, *duration).await
        }
        Commands::Decode { file, chunk } => {
            let config = load_config(cli, &SerialArgs::default())?;
            decode_file(cli, &config, file, *chunk)
        }
        Commands::Generate { command } => {
            let frame = generate(command);
            print_frame(cli, &frame)?;
            Ok(CliResult::success())
        }
        Commands::ConfigureBase {
            action,
            serial,
            msm7,
            save,
            follow,
        } => {
            let mut config = load_config(cli, serial)?;
            config.base.use_msm7 |= *msm7;
            if matches!(action, Some(BaseAction::Show)) {
                let gen = UbxGenerator::new();
                for frame in fixed_base_commands(&config.base, &gen) {
                    print_frame(cli, &frame)?;
                }
                return Ok(CliResult::success());
            }
            configure_base(cli, &config, *save, *follow).await
        }
        Commands::SurveyIn {
            serial,
            duration,
            accuracy,
            dry_run,
        } => {
            let frame = UbxGenerator::new().start_survey_in(*duration, *accuracy);
            if *dry_run {
                print_frame(cli, &frame)?;
                return Ok(CliResult::success());
            }
            let config = load_config(cli, serial)?;
            send_frames(&config, &[frame]).await?;
            Ok(CliResult::success_with_message(format!(
                "Survey-in started: {} s, {} m",
                duration, accuracy
            )))
        }
        Commands::Fixed {
            serial,
            x,
            y,
            z,
            accuracy,
            dry_run,
        } => {
            let coord = Coordinate::parse(x, y, z).context("parsing position")?;
            let gen = UbxGenerator::new();
            let frame = if coord.was_ecef {
                gen.config_fixed_mode_ecef(coord.ecef.x, coord.ecef.y, coord.ecef.z, *accuracy)
            } else {
                gen.config_fixed_mode_lla(coord.lla.lat, coord.lla.lon, coord.lla.alt, *accuracy)
            };

            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&coord)?);
            } else if !cli.quiet {
                println!("{}", coord);
                println!("Alt:    {:>15.4} ft", coord.alt_feet());
            }

            if *dry_run {
                print_frame(cli, &frame)?;
                return Ok(CliResult::success());
            }
            let config = load_config(cli, serial)?;
            send_frames(&config, &[frame]).await?;
            Ok(CliResult::success_with_message("Fixed mode configured"))
        }
        Commands::Checksum { algorithm, data } => {
            let bytes = hex::decode(data.replace(' ', "")).context("decoding hex data")?;
            let sum = calc_checksum(&bytes, (*algorithm).into());
            match cli.format {
                OutputFormat::Json => println!("{}", json!({ "checksum": hex::encode(&sum) })),
                _ => println!("{}", hex::encode_upper(&sum)),
            }
            Ok(CliResult::success())
        }
        Commands::Config { action } => handle_config(cli, action),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

fn config_file(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path().ok_or_else(|| config::ConfigError::NoConfigDir.into()),
    }
}

/// Load the configuration file and apply command line overrides
fn load_config(cli: &Cli, serial: &SerialArgs) -> anyhow::Result<StationConfig> {
    let path = config_file(cli)?;
    let mut config = StationConfig::load_from(&path)?;
    if let Some(port) = &serial.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = serial.baud {
        config.serial.baud_rate = baud;
    }
    debug!("configuration from {}", path.display());
    Ok(config)
}

fn handle_config(cli: &Cli, action: &ConfigAction) -> anyhow::Result<CliResult> {
    let path = config_file(cli)?;
    match action {
        ConfigAction::Show => {
            let config = StationConfig::load_from(&path)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                _ => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(CliResult::success())
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} exists (use --force to overwrite)", path.display()),
                ));
            }
            StationConfig::default().save_to(&path)?;
            Ok(CliResult::success_with_message(format!(
                "Wrote {}",
                path.display()
            )))
        }
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(CliResult::success())
        }
    }
}

fn show_ports(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(CliResult::success());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(CliResult::success())
}

fn generate(command: &GenerateCommand) -> bytes::Bytes {
    let gen = UbxGenerator::new();
    match command {
        GenerateCommand::Poll { class, id } => gen.poll(*class, *id),
        GenerateCommand::ResetDefaults => gen.reset_to_defaults(),
        GenerateCommand::RevertSaved => gen.revert_to_saved(),
        GenerateCommand::SaveConfig => gen.save_config(),
        GenerateCommand::Reboot { reset_type, mode } => {
            gen.reboot((*reset_type).into(), (*mode).into())
        }
        GenerateCommand::PollPort { port } => gen.poll_port((*port).into()),
        GenerateCommand::PollMsgRate { class, id } => gen.poll_msg_rate(*class, *id),
        GenerateCommand::ConfigPort { port, baud } => {
            let all = ubx::proto_mask::UBX | ubx::proto_mask::NMEA | ubx::proto_mask::RTCM3;
            gen.config_port((*port).into(), all, all, *baud)
        }
        GenerateCommand::Rate { ms } => gen.config_rate(*ms),
        GenerateCommand::NavStationary { no_dgnss } => gen.config_nav_stationary(!no_dgnss),
        GenerateCommand::DisableTmode3 => gen.disable_tmode3(),
        GenerateCommand::MsgRate { class, id, rate } => {
            gen.config_msg_rate(*class, *id, PortRates::uniform(*rate))
        }
        GenerateCommand::TurnOff { class, id } => gen.turn_off(*class, *id),
        GenerateCommand::Nmea { body } => bytes::Bytes::from(build_sentence(body).into_bytes()),
    }
}

fn print_frame(cli: &Cli, frame: &[u8]) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => {
            let protocol = frame
                .first()
                .and_then(|b| Protocol::from_lead_byte(*b))
                .map(|p| p.name());
            println!(
                "{}",
                json!({ "protocol": protocol, "len": frame.len(), "hex": hex::encode(frame) })
            );
        }
        OutputFormat::Hex => println!("{}", hex::encode(frame)),
        OutputFormat::Text => {
            let hex: Vec<String> = frame.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{}", hex.join(" "));
        }
    }
    Ok(())
}

/// One-line description of a validated frame
fn describe(protocol: Protocol, frame: &[u8]) -> String {
    match protocol {
        Protocol::Ubx if frame.len() >= ubx::FRAME_OVERHEAD => {
            let name = ubx::message_name(frame[2], frame[3]);
            let name = if name.is_empty() {
                format!("0x{:02X} 0x{:02X}", frame[2], frame[3])
            } else {
                name.to_string()
            };
            format!("UBX   {:<12} {:>5} bytes", name, frame.len())
        }
        Protocol::Rtcm3 => match rtcm3::Rtcm3Codec::message_type(frame) {
            Ok(msg_type) => format!(
                "RTCM3 {:<5} {:<30} {:>5} bytes",
                msg_type,
                rtcm3::message_name(msg_type),
                frame.len()
            ),
            Err(_) => format!("RTCM3 {:>5} bytes", frame.len()),
        },
        Protocol::Nmea => format!("NMEA  {}", String::from_utf8_lossy(frame).trim_end()),
        Protocol::Ubx => format!("UBX   {} bytes", frame.len()),
    }
}

/// Print decoded frames until the channel closes or `shutdown` fires
async fn print_events(
    mut events: broadcast::Receiver<EngineEvent>,
    format: OutputFormat,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(EngineEvent::Decoded { protocol, frame }) => match format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({
                        "protocol": protocol.name(),
                        "len": frame.len(),
                        "hex": hex::encode(&frame),
                    })
                ),
                OutputFormat::Hex => println!("{} {}", protocol.name(), hex::encode(&frame)),
                OutputFormat::Text => println!("{}", describe(protocol, &frame)),
            },
            Ok(EngineEvent::Write(frame)) => debug!("tx {} bytes", frame.len()),
            Ok(EngineEvent::CountUpdated { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("output skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Cancel on Ctrl+C or after `duration` seconds
fn shutdown_token(duration: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
        }
        on_signal.cancel();
    });
    if let Some(secs) = duration {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            on_timeout.cancel();
        });
    }
    token
}

async fn open_station(config: &StationConfig) -> anyhow::Result<Station> {
    let transport = SerialTransport::new(config.serial.clone());
    let mut station = Station::new(&config.station_settings(), Box::new(transport));
    station
        .connect()
        .await
        .with_context(|| format!("opening {}", config.serial.port))?;
    Ok(station)
}

async fn run_station(
    cli: &Cli,
    mut station: Station,
    duration: Option<u64>,
) -> anyhow::Result<CliResult> {
    let shutdown = shutdown_token(duration);
    let printer = tokio::spawn(print_events(station.subscribe(), cli.format, shutdown.clone()));

    let result = station.run(shutdown.clone()).await;
    shutdown.cancel();
    let _ = printer.await;

    if !cli.quiet && cli.format == OutputFormat::Text {
        print_report(station.engine());
    }
    result.context("receiver connection")?;
    Ok(CliResult::success())
}

async fn monitor(cli: &Cli, config: &StationConfig, duration: Option<u64>) -> anyhow::Result<CliResult> {
    let station = open_station(config).await?;
    if let Some(path) = station.capture().and_then(|c| c.path()) {
        info!("capture file {}", path.display());
    }
    run_station(cli, station, duration).await
}

async fn configure_base(
    cli: &Cli,
    config: &StationConfig,
    save: bool,
    follow: bool,
) -> anyhow::Result<CliResult> {
    let mut station = open_station(config).await?;
    station
        .configure_base(&config.base)
        .await
        .context("sending base configuration")?;
    if save {
        let frame = station.engine().generator().save_config();
        station.send(&frame).await.context("saving configuration")?;
    }

    if follow {
        return run_station(cli, station, None).await;
    }
    Ok(CliResult::success_with_message(
        "Fixed-base configuration sent",
    ))
}

/// Open the receiver, push `frames` through the write pipeline and close
async fn send_frames(config: &StationConfig, frames: &[bytes::Bytes]) -> anyhow::Result<()> {
    let mut station = open_station(config).await?;
    for frame in frames {
        station.send(frame).await.context("sending command")?;
    }
    let stats = station.engine().stats();
    if stats.write_rejects > 0 {
        anyhow::bail!("{} frames failed validation", stats.write_rejects);
    }
    Ok(())
}

fn decode_file(
    cli: &Cli,
    config: &StationConfig,
    file: &Path,
    chunk: usize,
) -> anyhow::Result<CliResult> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let chunk = chunk.clamp(1, config.engine.rx_capacity.max(1));

    let mut engine = Engine::new(config.engine.clone());
    for piece in data.chunks(chunk) {
        engine.ingest(piece);
    }

    match cli.format {
        OutputFormat::Json => {
            let unhandled: BTreeMap<String, u64> = engine
                .ubx()
                .unhandled()
                .iter()
                .map(|(key, count)| (format!("{:04x}", key), *count))
                .collect();
            let report = json!({
                "file": file.display().to_string(),
                "bytes": data.len(),
                "counts": {
                    "ubx": engine.count(Protocol::Ubx),
                    "rtcm3": engine.count(Protocol::Rtcm3),
                    "nmea": engine.count(Protocol::Nmea),
                },
                "stats": engine.stats(),
                "rtcm3_messages": engine.rtcm3().messages(),
                "nmea_sentences": engine.nmea().sentences(),
                "ubx_unhandled": unhandled,
                "nav_pvt": engine.ubx().nav_pvt(),
                "nav_svin": engine.ubx().nav_svin(),
                "cfg_tmode3": engine.ubx().cfg_tmode3(),
                "mon_ver": engine.ubx().mon_ver(),
                "station": engine.rtcm3().station(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("{}: {} bytes", file.display(), data.len());
            print_report(&engine);
        }
    }

    if engine.stats().corrupt_frames > 0 {
        warn!("{} corrupt frames skipped", engine.stats().corrupt_frames);
    }
    Ok(CliResult::success())
}

/// Tallies and the latest records
fn print_report(engine: &Engine) {
    let stats = engine.stats();
    println!();
    println!("Frames:");
    for protocol in Protocol::all() {
        println!("  {:<6} {:>8}", protocol.name(), engine.count(*protocol));
    }
    println!(
        "  corrupt {}, resyncs {}, overflows {}",
        stats.corrupt_frames, stats.resyncs, stats.overflows
    );

    if !engine.rtcm3().messages().is_empty() {
        println!();
        println!("RTCM 3 messages:");
        for (msg_type, count) in engine.rtcm3().messages() {
            println!("  {:<5} {:<32} {:>8}", msg_type, rtcm3::message_name(*msg_type), count);
        }
    }

    if !engine.nmea().sentences().is_empty() {
        println!();
        println!("NMEA sentences:");
        for (address, count) in engine.nmea().sentences() {
            println!("  {:<8} {:>8}", address, count);
        }
    }

    let ubx = engine.ubx();
    let records: [(&str, bool, String); 5] = [
        ("NAV-PVT", ubx.nav_pvt().has_data(), ubx.nav_pvt().value().to_string()),
        ("NAV-SVIN", ubx.nav_svin().has_data(), ubx.nav_svin().value().to_string()),
        ("CFG-TMODE3", ubx.cfg_tmode3().has_data(), ubx.cfg_tmode3().value().to_string()),
        ("MON-VER", ubx.mon_ver().has_data(), ubx.mon_ver().value().to_string()),
        ("MON-HW", ubx.mon_hw().has_data(), ubx.mon_hw().value().to_string()),
    ];
    for (name, present, text) in records {
        if present {
            println!();
            println!("{}:", name);
            println!("{}", text);
        }
    }

    if engine.rtcm3().station().has_data() {
        println!();
        println!("Reference station:");
        println!("{}", engine.rtcm3().station().value());
    }
}

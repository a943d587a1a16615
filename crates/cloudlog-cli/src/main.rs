//! # cloudlog
//!
//! Records synthetic point-cloud sessions and inspects the resulting
//! containers.
//!
//! ## Usage
//!
//! ```bash
//! # Record the demo session (100 frames of 1000 points, 100 ms apart)
//! cloudlog record --output clouds.mcap
//!
//! # Show header, statistics, schemas and channels
//! cloudlog info clouds.mcap
//!
//! # List messages of channel 0
//! cloudlog dump clouds.mcap --channel 0
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudlog_core::container::{ContainerError, LogReader, Message, ScanReport, Statistics};
use cloudlog_core::encoding::PointCloud;
use cloudlog_core::recorder::{run_demo, RecorderConfig};

/// cloudlog - point-cloud telemetry recorder
#[derive(Parser)]
#[command(name = "cloudlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a synthetic point-cloud session
    Record {
        /// Output container path
        #[arg(short, long, default_value = "pointcloud.mcap")]
        output: PathBuf,

        /// JSON recorder config; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of frames
        #[arg(short, long)]
        frames: Option<u32>,

        /// Points per frame
        #[arg(short, long)]
        points: Option<usize>,

        /// Log time between frames in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Sampler seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Display information about a container
    Info {
        /// Container path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List messages with sequence, log time and point count
    Dump {
        /// Container path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Only this channel
        #[arg(short, long)]
        channel: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Record {
            output,
            config,
            frames,
            points,
            interval_ms,
            seed,
        } => {
            let mut config = match config {
                Some(path) => RecorderConfig::from_file(&path)?,
                None => RecorderConfig::default(),
            };
            if let Some(frames) = frames {
                config.frames = frames;
            }
            if let Some(points) = points {
                config.points_per_frame = points;
            }
            if let Some(interval_ms) = interval_ms {
                config.frame_interval_ms = interval_ms;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            run_record(config, &output, &mut out)
        }
        Commands::Info { file, json } => run_info(&file, json, &mut out),
        Commands::Dump { file, channel } => run_dump(&file, channel, &mut out),
    }
}

/// Record the demo session
fn run_record(config: RecorderConfig, output: &Path, out: &mut impl Write) -> Result<()> {
    info!(
        frames = config.frames,
        points = config.points_per_frame,
        "Recording to {}",
        output.display()
    );
    let stats = run_demo(config, output)
        .with_context(|| format!("Recording to {} failed", output.display()))?;

    writeln!(
        out,
        "Wrote {} messages to {}",
        stats.message_count,
        output.display()
    )?;
    Ok(())
}

/// Open a container, or scan it when it was never finalized
fn open_or_scan(file: &Path) -> Result<Result<LogReader, ScanReport>> {
    match LogReader::open(file) {
        Ok(reader) => Ok(Ok(reader)),
        Err(ContainerError::Incomplete) => {
            let report = LogReader::scan(file)
                .with_context(|| format!("Failed to scan {}", file.display()))?;
            Ok(Err(report))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to open {}", file.display())),
    }
}

/// Print header, statistics, schemas and channels
fn run_info(file: &Path, json: bool, out: &mut impl Write) -> Result<()> {
    let reader = match open_or_scan(file)? {
        Ok(reader) => reader,
        Err(report) => return print_scan_info(file, &report, out),
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &reader.summary())?;
        writeln!(out)?;
        return Ok(());
    }

    let stats = reader.statistics();
    writeln!(out, "CloudLog Container")?;
    writeln!(out, "==================")?;
    writeln!(out, "File: {}", file.display())?;
    writeln!(out, "Library: {}", reader.header().library)?;
    writeln!(out, "Profile: {:?}", reader.header().profile)?;
    writeln!(out)?;
    writeln!(out, "Statistics:")?;
    writeln!(out, "  Messages: {}", stats.message_count)?;
    writeln!(out, "  Schemas: {}", stats.schema_count)?;
    writeln!(out, "  Channels: {}", stats.channel_count)?;
    writeln!(out, "  Metadata: {}", stats.metadata_count)?;
    if stats.message_count > 0 {
        writeln!(out, "  Time range: {}", time_range(stats))?;
    }
    writeln!(out)?;

    writeln!(out, "Schemas:")?;
    for schema in reader.schemas() {
        writeln!(
            out,
            "  [{}] {} ({}, {} bytes)",
            schema.id,
            schema.name,
            schema.encoding,
            schema.data.len()
        )?;
    }
    writeln!(out, "Channels:")?;
    for channel in reader.channels() {
        writeln!(
            out,
            "  [{}] {} ({}, schema {}): {} messages",
            channel.id,
            channel.topic,
            channel.message_encoding,
            channel.schema_id,
            reader.message_count(channel.id)
        )?;
    }
    for name in reader.metadata_names() {
        if let Some(metadata) = reader.metadata(name)? {
            writeln!(out, "Metadata '{}':", name)?;
            for (key, value) in &metadata.metadata {
                writeln!(out, "  {}: {}", key, value)?;
            }
        }
    }
    Ok(())
}

/// Statistics of an unchecked summary may put the end before the start
fn time_range(stats: &Statistics) -> String {
    let duration_ms = stats
        .message_end_time
        .saturating_sub(stats.message_start_time)
        / 1_000_000;
    format!(
        "{} .. {} ({} ms)",
        stats.message_start_time, stats.message_end_time, duration_ms
    )
}

fn print_scan_info(file: &Path, report: &ScanReport, out: &mut impl Write) -> Result<()> {
    writeln!(out, "CloudLog Container (incomplete)")?;
    writeln!(out, "===============================")?;
    writeln!(out, "File: {}", file.display())?;
    if let Some(header) = &report.header {
        writeln!(out, "Library: {}", header.library)?;
    }
    writeln!(out, "Recovered bytes: {}", report.valid_len)?;
    if let Some(error) = &report.error {
        writeln!(out, "Stopped at: {}", error)?;
    }
    writeln!(out)?;
    writeln!(out, "Recovered:")?;
    writeln!(out, "  Messages: {}", report.messages.len())?;
    writeln!(out, "  Schemas: {}", report.registry.schema_count())?;
    writeln!(out, "  Channels: {}", report.registry.channel_count())?;
    writeln!(out, "  Metadata: {}", report.metadata.len())?;
    for channel in report.registry.channels() {
        writeln!(out, "  [{}] {}", channel.id, channel.topic)?;
    }
    Ok(())
}

/// List messages, optionally of one channel
fn run_dump(file: &Path, channel: Option<u16>, out: &mut impl Write) -> Result<()> {
    match open_or_scan(file)? {
        Ok(reader) => {
            if let Some(id) = channel {
                if reader.channel(id).is_none() {
                    anyhow::bail!("Channel {} does not exist in {}", id, file.display());
                }
            }
            for message in reader.messages() {
                let message = message?;
                if on_channel(&message, channel) {
                    print_message(&message, out)?;
                }
            }
        }
        Err(report) => {
            writeln!(out, "# incomplete container, messages recovered by scan")?;
            for message in report.messages.iter().filter(|&m| on_channel(m, channel)) {
                print_message(message, out)?;
            }
        }
    }
    Ok(())
}

fn on_channel(message: &Message<'_>, channel: Option<u16>) -> bool {
    channel.map_or(true, |id| message.channel_id == id)
}

fn print_message(message: &Message<'_>, out: &mut impl Write) -> Result<()> {
    let points = match PointCloud::decode(&message.data) {
        Ok(cloud) => cloud.point_count().to_string(),
        Err(_) => "-".to_string(),
    };
    writeln!(
        out,
        "channel={} seq={} log_time={} bytes={} points={}",
        message.channel_id,
        message.sequence,
        message.log_time,
        message.data.len(),
        points
    )?;
    Ok(())
}

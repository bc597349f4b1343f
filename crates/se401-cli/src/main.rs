use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use se401_core::{CaptureSession, FrameCollector};
use se401_hw::descriptor::parse_descriptor;
use se401_hw::quirks::{list_devices, lookup_device, parse_usb_id};
use se401_hw::sim::SimulatedSensor;
use serde::Serialize;
use std::path::{Path, PathBuf};

mod config;

#[derive(Parser)]
#[command(name = "se401", about = "SE401 camera stream tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported cameras, or look one up by VID:PID
    Devices {
        /// USB id as printed by lsusb (e.g. "047d:5003")
        #[arg(long)]
        id: Option<String>,
    },
    /// Decode a raw camera descriptor dump
    Modes {
        /// File holding the 64-byte descriptor
        descriptor: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Replay a recorded bulk stream through a capture session
    Replay {
        /// Raw bulk endpoint capture
        dump: PathBuf,
        /// Capture profile index
        #[arg(short, long, default_value_t = 0)]
        profile: usize,
        /// Bytes per bulk chunk (overrides SE401_CHUNK_SIZE)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Advertised sizes, e.g. "352x288,176x144" (overrides SE401_SENSOR_SIZES)
        #[arg(long)]
        sizes: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

/// Summary of a replayed stream.
#[derive(Debug, Default, Serialize)]
struct ReplayReport {
    profile: String,
    chunks: usize,
    bytes: usize,
    frames_delivered: usize,
    frames_discarded: usize,
    empty_frames: usize,
    desyncs: usize,
    restart_failures: usize,
    stream_starts: usize,
    final_reset_level: u8,
    mean_frame_bytes: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::Config::from_env();

    match cli.command {
        Commands::Devices { id } => devices(id.as_deref())?,
        Commands::Modes { descriptor, json } => modes(&descriptor, json)?,
        Commands::Replay {
            dump,
            profile,
            chunk_size,
            sizes,
            json,
        } => {
            let chunk_size = chunk_size.unwrap_or(config.chunk_size);
            let sizes = match sizes {
                Some(s) => config::parse_sizes(&s)
                    .with_context(|| format!("invalid size list {s:?}"))?,
                None => config.sensor_sizes.clone(),
            };
            let report = replay(&config, &dump, profile, chunk_size, &sizes)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

fn devices(id: Option<&str>) -> Result<()> {
    let Some(id) = id else {
        for d in list_devices() {
            println!("{:04x}:{:04x}  {}", d.vendor_id, d.product_id, d.name);
        }
        return Ok(());
    };
    let (vid, pid) = parse_usb_id(id).with_context(|| format!("invalid USB id {id:?}"))?;
    match lookup_device(vid, pid) {
        Some(d) => println!("{:04x}:{:04x}  {}  (supported)", vid, pid, d.name),
        None => println!("{vid:04x}:{pid:04x}  not an SE401 camera"),
    }
    Ok(())
}

fn modes(path: &Path, json: bool) -> Result<()> {
    let cd = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let desc = parse_descriptor(&cd).context("unsupported camera descriptor")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&desc.profiles)?);
        return Ok(());
    }
    for (i, p) in desc.profiles.iter().enumerate() {
        println!("{i:2}  {p}  (buffer {} bytes)", p.frame_buffer_size());
    }
    if desc.extra_features != 0 {
        println!("extra features: {:#04x}", desc.extra_features);
    }
    Ok(())
}

fn replay(
    config: &config::Config,
    dump: &Path,
    profile: usize,
    chunk_size: usize,
    sizes: &[(u16, u16)],
) -> Result<ReplayReport> {
    if chunk_size == 0 {
        bail!("chunk size must be non-zero");
    }
    let data = std::fs::read(dump).with_context(|| format!("reading {}", dump.display()))?;

    let sensor = SimulatedSensor::with_sizes(sizes);
    let mut session = CaptureSession::configure(sensor, config.session()?)?;
    session.start(profile)?;

    let mut sink = FrameCollector::new();
    let mut report = ReplayReport::default();
    for chunk in data.chunks(chunk_size) {
        let outcome = session.handle_chunk(chunk, &mut sink);
        report.chunks += 1;
        report.bytes += chunk.len();
        report.frames_discarded += outcome.discarded;
        if outcome.desync.is_some() {
            report.desyncs += 1;
        }
        if let Some(e) = &outcome.restart_error {
            report.restart_failures += 1;
            tracing::warn!(error = %e, chunk = report.chunks, "stream restart failed");
        }
    }
    session.stop();

    let frames = sink.take_frames();
    let delivered: Vec<_> = frames.iter().filter(|f| f.valid).collect();
    report.frames_delivered = delivered.len();
    report.empty_frames = delivered.iter().filter(|f| f.data.is_empty()).count();
    let payload: usize = delivered.iter().map(|f| f.data.len()).sum();
    report.mean_frame_bytes = payload.checked_div(delivered.len()).unwrap_or(0);
    report.final_reset_level = session.reset_level();
    report.stream_starts = session
        .channel()
        .transport()
        .count(se401_hw::registers::Request::StartContinuousCapture);
    report.profile = session
        .active_profile()
        .map(ToString::to_string)
        .unwrap_or_default();

    tracing::info!(
        frames = report.frames_delivered,
        desyncs = report.desyncs,
        "replay finished"
    );
    Ok(report)
}

fn print_report(r: &ReplayReport) {
    println!("profile:          {}", r.profile);
    println!("chunks:           {} ({} bytes)", r.chunks, r.bytes);
    println!("frames delivered: {}", r.frames_delivered);
    println!("frames discarded: {}", r.frames_discarded);
    println!("empty frames:     {}", r.empty_frames);
    println!("desyncs:          {}", r.desyncs);
    println!("restart failures: {}", r.restart_failures);
    println!("stream starts:    {}", r.stream_starts);
    println!("mean frame size:  {} bytes", r.mean_frame_bytes);
    println!("reset level:      {:#04x}", r.final_reset_level);
}

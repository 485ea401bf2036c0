//! # VAPROC CLI
//!
//! Probe a VA-API device and push synthetic frames through the
//! post-processing filters.
//!
//! ## Usage
//! ```bash
//! # What the device offers, as JSON
//! vaproc probe [--device /dev/dri/renderD128] [--size 1920x1080]
//!
//! # Run 300 frames through denoise while sweeping its strength
//! vaproc run denoise --frames 300 --sweep denoise-sigma=0:2
//!
//! # With debug logging
//! RUST_LOG=vaproc_core=debug vaproc run deinterlace --set deinterlace-mode=bob
//! ```

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use vaproc_core::frame::{Chroma, PictureMeta, VideoFormat};
use vaproc_core::pool::PoolStats;
use vaproc_core::{FilterSettings, VarStore, MODULES};

/// Surfaces in the stand-in decoder pool.
const DECODER_POOL_SIZE: usize = 8;
/// Frame duration of the synthetic stream (25 fps).
const FRAME_DURATION_US: i64 = 40_000;

// ============================================================================
// Options
// ============================================================================

struct CommonOptions {
    device: PathBuf,
    width: u32,
    height: u32,
    ten_bit: bool,
}

impl CommonOptions {
    fn format(&self) -> VideoFormat {
        let chroma = if self.ten_bit {
            Chroma::Vaapi420_10
        } else {
            Chroma::Vaapi420
        };
        VideoFormat::new(chroma, self.width, self.height)
    }
}

struct Sweep {
    name: String,
    min: f32,
    max: f32,
}

struct RunOptions {
    common: CommonOptions,
    filter: String,
    frames: u64,
    config: Option<PathBuf>,
    overrides: Vec<(String, String)>,
    sweep: Option<Sweep>,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing value for {}", flag))
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("Invalid size {}, expected WIDTHxHEIGHT", value))?;
    Ok((w.parse()?, h.parse()?))
}

fn parse_sweep(value: &str) -> Result<Sweep> {
    let (name, range) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid sweep {}, expected name=min:max", value))?;
    let (min, max) = range
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid sweep range {}, expected min:max", range))?;
    Ok(Sweep {
        name: name.to_string(),
        min: min.parse()?,
        max: max.parse()?,
    })
}

/// Parse the flags shared by every command. Unknown flags are left for the
/// command parser.
fn parse_common(args: &[String], i: &mut usize, common: &mut CommonOptions) -> Result<bool> {
    match args[*i].as_str() {
        "--device" | "-d" => {
            common.device = PathBuf::from(value(args, *i, "--device")?);
            *i += 2;
        }
        "--size" | "-s" => {
            let (w, h) = parse_size(value(args, *i, "--size")?)?;
            common.width = w;
            common.height = h;
            *i += 2;
        }
        "--10bit" => {
            common.ten_bit = true;
            *i += 1;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn default_common() -> CommonOptions {
    CommonOptions {
        device: default_device(),
        width: 1920,
        height: 1080,
        ten_bit: false,
    }
}

fn parse_probe_args(args: &[String]) -> Result<CommonOptions> {
    let mut common = default_common();
    let mut i = 2;
    while i < args.len() {
        if !parse_common(args, &mut i, &mut common)? {
            return Err(anyhow!("Unknown probe option {}", args[i]));
        }
    }
    Ok(common)
}

fn parse_run_args(args: &[String]) -> Result<RunOptions> {
    let mut common = default_common();
    let mut filter: Option<String> = None;
    let mut frames: u64 = 250;
    let mut config: Option<PathBuf> = None;
    let mut overrides = Vec::new();
    let mut sweep: Option<Sweep> = None;

    let mut i = 2;
    while i < args.len() {
        if parse_common(args, &mut i, &mut common)? {
            continue;
        }
        match args[i].as_str() {
            "--frames" | "-n" => {
                let v = value(args, i, "--frames")?;
                frames = v
                    .parse::<u64>()
                    .map_err(|e| anyhow!("Invalid frame count {}: {}", v, e))?;
                i += 2;
            }
            "--config" | "-c" => {
                config = Some(PathBuf::from(value(args, i, "--config")?));
                i += 2;
            }
            "--set" => {
                let v = value(args, i, "--set")?;
                let (name, val) = v
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Invalid --set {}, expected name=value", v))?;
                overrides.push((name.to_string(), val.to_string()));
                i += 2;
            }
            "--sweep" => {
                sweep = Some(parse_sweep(value(args, i, "--sweep")?)?);
                i += 2;
            }
            other if filter.is_none() && !other.starts_with('-') => {
                filter = Some(other.to_string());
                i += 1;
            }
            other => return Err(anyhow!("Unknown run option {}", other)),
        }
    }

    let filter = filter.ok_or_else(|| {
        print_usage();
        anyhow!("Missing filter name for run")
    })?;

    Ok(RunOptions {
        common,
        filter,
        frames,
        config,
        overrides,
        sweep,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  vaproc probe [--device <node>] [--size WxH] [--10bit]\n  vaproc run <filter> [--frames <n>] [--config <file>] [--set name=value]... [--sweep name=min:max]\n  vaproc list\n"
    );
}

// ============================================================================
// Settings
// ============================================================================

fn build_vars(options: &RunOptions) -> Result<Arc<VarStore>> {
    let settings = match &options.config {
        Some(path) => {
            info!("Loading settings from {:?}", path);
            FilterSettings::load(path)?
        }
        None => FilterSettings::default(),
    };
    let vars = VarStore::from_settings(&settings);

    for (name, val) in &options.overrides {
        if vars.is_string(name) {
            vars.set_string(name, val)?;
        } else {
            let v = val
                .parse::<f32>()
                .map_err(|e| anyhow!("Invalid value for {}: {} ({})", name, val, e))?;
            vars.set_float(name, v)?;
        }
        debug!("override {} = {}", name, val);
    }
    Ok(vars)
}

/// Counts of the background parameter sweep.
#[derive(Debug, Default, Clone, Serialize)]
struct SweepStats {
    parameter: String,
    updates: u64,
    rejected: u64,
    last_value: f32,
}

/// Walk `sweep.name` between its bounds until `stop` is raised.
fn spawn_sweep(
    vars: Arc<VarStore>,
    sweep: Sweep,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<SweepStats>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        const STEPS: u32 = 32;
        let mut step = 0u32;
        stats.lock().parameter = sweep.name.clone();
        while !stop.load(Ordering::Acquire) {
            // Triangle wave min -> max -> min.
            let phase = step % (2 * STEPS);
            let t = if phase < STEPS {
                phase as f32 / STEPS as f32
            } else {
                (2 * STEPS - phase) as f32 / STEPS as f32
            };
            let v = sweep.min + (sweep.max - sweep.min) * t;

            let mut s = stats.lock();
            match vars.set_float(&sweep.name, v) {
                Ok(()) => {
                    s.updates += 1;
                    s.last_value = v;
                }
                Err(e) => {
                    s.rejected += 1;
                    debug!("sweep {} = {} rejected: {}", sweep.name, v, e);
                }
            }
            drop(s);

            step = step.wrapping_add(1);
            thread::sleep(Duration::from_millis(2));
        }
    })
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Serialize)]
struct RunSummary {
    filter: String,
    device: PathBuf,
    width: u32,
    height: u32,
    frames_in: u64,
    frames_out: u64,
    dropped: u64,
    decoder_starved: u64,
    elapsed_ms: u128,
    fps: f64,
    output_pool: PoolStats,
    decoder_pool: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    sweep: Option<SweepStats>,
}

fn list_filters() {
    for module in &MODULES {
        println!(
            "{:<12} {}  [{}]",
            module.shortcut,
            module.description,
            module.parameters.join(", ")
        );
    }
}

#[cfg(target_os = "linux")]
fn probe(options: CommonOptions) -> Result<()> {
    use vaproc_core::vaapi::VaapiInstance;
    use vaproc_core::{probe_capabilities, SessionSource};

    let instance = VaapiInstance::new(&options.device);
    let session = instance.hold()?;
    let caps = probe_capabilities(&session, &options.format())?;

    info!("usable filters: {}", caps.usable_modules().join(", "));
    println!("{}", serde_json::to_string_pretty(&caps)?);
    Ok(())
}

#[cfg(target_os = "linux")]
fn run(options: RunOptions) -> Result<()> {
    use vaproc_core::vaapi::VaapiInstance;
    use vaproc_core::{FilterContext, SessionSource, SurfacePool, VaFilter};

    let vars = build_vars(&options)?;
    let format = options.common.format();
    let instance = VaapiInstance::new(&options.common.device);

    // Stand-in for the decoder: frames come from a pool of our own.
    let session = instance.hold()?;
    let decoder_pool = SurfacePool::new(Arc::clone(&session), DECODER_POOL_SIZE, &format)?;

    let ctx = FilterContext {
        source: &instance,
        fmt_in: format,
        fmt_out: format,
        vars: Arc::clone(&vars),
    };
    let mut filter = VaFilter::open(&options.filter, &ctx)?;

    let sweeping = options.sweep.is_some();
    let stop = Arc::new(AtomicBool::new(false));
    let sweep_stats = Arc::new(Mutex::new(SweepStats::default()));
    let sweeper = options.sweep.map(|sweep| {
        info!("Sweeping {} over [{}, {}]", sweep.name, sweep.min, sweep.max);
        spawn_sweep(
            Arc::clone(&vars),
            sweep,
            Arc::clone(&stop),
            Arc::clone(&sweep_stats),
        )
    });

    info!(
        "Running {} frames through {} at {}x{}",
        options.frames, options.filter, format.width, format.height
    );

    let start = Instant::now();
    let mut frames_in = 0u64;
    let mut frames_out = 0u64;
    let mut starved = 0u64;

    for n in 0..options.frames {
        let Some(mut input) = decoder_pool.try_acquire() else {
            starved += 1;
            continue;
        };
        input.meta = PictureMeta {
            pts_us: n as i64 * FRAME_DURATION_US,
            duration_us: FRAME_DURATION_US,
            progressive: false,
            top_field_first: true,
            field_count: 2,
            keyframe: n == 0,
        };
        frames_in += 1;

        // The output is consumed right away, as a display would.
        if filter.filter(input).is_some() {
            frames_out += 1;
        }
    }
    filter.flush();
    let elapsed = start.elapsed();

    stop.store(true, Ordering::Release);
    if let Some(handle) = sweeper {
        if handle.join().is_err() {
            warn!("sweep thread panicked");
        }
    }

    let summary = RunSummary {
        filter: options.filter.clone(),
        device: options.common.device.clone(),
        width: format.width,
        height: format.height,
        frames_in,
        frames_out,
        dropped: frames_in - frames_out,
        decoder_starved: starved,
        elapsed_ms: elapsed.as_millis(),
        fps: frames_out as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        output_pool: filter.resources().pool().stats(),
        decoder_pool: decoder_pool.stats(),
        sweep: sweeping.then(|| sweep_stats.lock().clone()),
    };
    filter.close();

    info!(
        "Run complete: {} in, {} out, {:.1} fps",
        summary.frames_in, summary.frames_out, summary.fps
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(target_os = "linux")]
fn default_device() -> PathBuf {
    vaproc_core::vaapi::render_nodes()
        .into_iter()
        .next()
        .unwrap_or_else(|| PathBuf::from(vaproc_core::vaapi::DEFAULT_RENDER_NODE))
}

#[cfg(not(target_os = "linux"))]
fn default_device() -> PathBuf {
    PathBuf::new()
}

#[cfg(not(target_os = "linux"))]
fn probe(_options: CommonOptions) -> Result<()> {
    Err(vaproc_core::VaError::Unsupported("VA-API is only available on Linux".into()).into())
}

#[cfg(not(target_os = "linux"))]
fn run(options: RunOptions) -> Result<()> {
    let _ = build_vars(&options)?;
    Err(vaproc_core::VaError::Unsupported("VA-API is only available on Linux".into()).into())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vaproc=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("probe") => probe(parse_probe_args(&args)?),
        Some("run") => run(parse_run_args(&args)?),
        Some("list") => {
            list_filters();
            Ok(())
        }
        Some("--help") | Some("-h") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            Err(anyhow!("Unknown command {}", other))
        }
    }
}

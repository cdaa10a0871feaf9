//! linecam_demo - stream frames from a line camera and print the peak position
//!
//! Configuration comes from `LINECAM_CONFIG` / `LINECAM_*` first, then the
//! command line. With no configuration at all it runs against the synthetic
//! `stub://linecam` camera.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use linecam::{
    Backpressure, CaptureFault, DeviceSession, LineCamConfig, LineCamError, Mode, PeakEstimator,
    ThresholdFilter,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of frames to measure.
    #[arg(long, default_value_t = 20)]
    frames: u64,
    /// Device identifier (overrides config), e.g. stub://bench?peak=900.
    #[arg(long)]
    device: Option<String>,
    /// Exposure in milliseconds (overrides config).
    #[arg(long)]
    exposure: Option<f32>,
    /// Acquisition mode: normal or triggered (overrides config).
    #[arg(long)]
    mode: Option<Mode>,
    /// Zero dark-subtracted samples below this level before estimating.
    #[arg(long)]
    threshold: Option<u16>,
    #[arg(long, value_enum, default_value_t = EstimatorKind::Centroid)]
    estimator: EstimatorKind,
    /// Print one JSON object per frame instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EstimatorKind {
    Centroid,
    Peak,
}

#[derive(Serialize)]
struct Measurement {
    sequence: u64,
    timestamp: u16,
    dark_mean: u16,
    position: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LineCamConfig::load()?;
    if let Some(device) = args.device {
        cfg.device = device;
    }
    if let Some(exposure) = args.exposure {
        cfg.exposure_ms = exposure;
    }
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }

    let mut session: DeviceSession =
        DeviceSession::open(cfg.session_options()).context("open line camera")?;
    log::info!(
        "{} | serial {} | firmware {} | {} pixels ({} dark)",
        session.library_version(),
        session.serial_number(),
        session.firmware_version(),
        session.pixel_count(),
        session.dark_pixel_count()
    );

    let handle = session.handle();
    ctrlc::set_handler(move || handle.close()).context("install ctrl-c handler")?;

    if let Some(level) = args.threshold {
        session.set_filter(ThresholdFilter::new(level));
    }
    if let EstimatorKind::Peak = args.estimator {
        session.set_estimator(PeakEstimator);
    }

    let mut measured = 0u64;
    let mut missed = 0u64;
    while measured < args.frames {
        let captured = session.query_fifo_depth().and_then(|depth| {
            if depth.backpressure() == Backpressure::Drain {
                log::debug!("device fifo full, draining");
            }
            session.capture()
        });
        let meta = match captured {
            Ok(meta) => meta,
            Err(err) if err.is_no_data() => {
                missed += 1;
                continue;
            }
            Err(err) if interrupted(&err, &session) => {
                log::info!("interrupted");
                break;
            }
            Err(err) => return Err(err.into()),
        };

        session.apply_filter(&mut ())?;
        let position = session.apply_estimator(&mut ())?;
        let measurement = Measurement {
            sequence: meta.sequence,
            timestamp: meta.timestamp,
            dark_mean: meta.dark_mean,
            position: (!position.is_nan()).then_some(position),
        };
        if args.json {
            println!("{}", serde_json::to_string(&measurement)?);
        } else {
            match measurement.position {
                Some(x) => println!(
                    "frame {:>5}  t={:>5}  dark={:>4}  peak at {:.3}",
                    measurement.sequence, measurement.timestamp, measurement.dark_mean, x
                ),
                None => println!(
                    "frame {:>5}  t={:>5}  dark={:>4}  no peak",
                    measurement.sequence, measurement.timestamp, measurement.dark_mean
                ),
            }
        }
        measured += 1;
    }

    session.close();
    eprintln!("linecam_demo: {} frames measured, {} empty reads", measured, missed);
    Ok(())
}

/// Ctrl-C closes the session through its handle; whichever call notices first
/// reports either an aborted capture or a closed session.
fn interrupted(err: &LineCamError, session: &DeviceSession) -> bool {
    matches!(err, LineCamError::Capture(CaptureFault::Aborted))
        || (err.is_connection() && !session.is_open())
}

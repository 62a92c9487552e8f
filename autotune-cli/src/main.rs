//! # Autotune - headless string tuner
//!
//! Captures the default audio input, runs it through a `TuningSession` at the
//! configured update interval and, when a serial port is given, lets the
//! session drive the tensioner. Readings are written to the log.
//!
//! ## Threads
//! - **Audio callback**: cuts samples into frames and sends them over a
//!   bounded crossbeam channel
//! - **Main thread**: on every tick takes the newest frame and processes it
//!   until the deadline passes or Ctrl-C arrives, then stops the session so
//!   the motor is told to abort
//! - **Core threads**: motor reader and tuning runs, owned by the session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::select;
use log::{debug, info, warn};

use autotune_core::tuning::{find_guitar_string, standard_guitar};
use autotune_core::{
    audio, Action, FrameReport, MotorDriver, MotorLink, TunerConfig, TuningTarget, TuningSession,
};

#[derive(Debug, Parser)]
#[command(name = "autotune", version, about = "Pitch tracker and motorised string tuner")]
struct Args {
    /// JSON config file; defaults are used for anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the tensioner (e.g. /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Guitar string to tune, by note ("A2") or label ("5 - A2")
    #[arg(short, long, conflicts_with = "frequency")]
    target: Option<String>,

    /// Arbitrary target frequency in Hz
    #[arg(short, long)]
    frequency: Option<f32>,

    /// Show readings only; never move the motor
    #[arg(long)]
    no_motor: bool,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// List the built-in guitar targets and exit
    #[arg(long)]
    list_targets: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_targets {
        for target in standard_guitar() {
            println!("{:<8} {:>8.2} Hz", target.label, target.frequency);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => TunerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TunerConfig::default(),
    };
    if args.no_motor {
        config.motor.enabled = false;
    }

    let target = resolve_target(&args)?;
    let motor = open_motor(&args, &config);

    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Vec<f32>>(8);
    let (_stream, sample_rate) =
        audio::start_audio_capture(frame_tx, config.sample_rate, config.frame_size)
            .context("starting audio capture")?;
    config.sample_rate = sample_rate;

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    let ticker = crossbeam_channel::tick(config.update_interval());
    let mut session = TuningSession::new(config, motor);
    if let Some(target) = target {
        info!("Target: {} ({:.2} Hz)", target.label, target.frequency);
        session.select_target(target);
    }
    session.start();

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_action = None;
    let mut last_frame_at = Instant::now();

    loop {
        select! {
            recv(ticker) -> tick => {
                if tick.is_err() {
                    break;
                }
            }
            recv(shutdown_rx) -> _ => {
                info!("Interrupted");
                break;
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let Some(frame) = frame_rx.try_iter().last() else {
            if last_frame_at.elapsed() > Duration::from_secs(2) {
                warn!("No audio frames received");
                last_frame_at = Instant::now();
            }
            continue;
        };
        last_frame_at = Instant::now();

        let report = session.process_frame(&frame);
        log_report(&report, last_action != Some(report.action));
        last_action = Some(report.action);
    }

    session.stop();
    if !session.completed_targets().is_empty() {
        info!("Completed: {}", session.completed_targets().join(", "));
    }
    Ok(())
}

fn resolve_target(args: &Args) -> Result<Option<TuningTarget>> {
    if let Some(name) = &args.target {
        return match find_guitar_string(name) {
            Some(target) => Ok(Some(target.clone())),
            None => bail!("unknown target '{}'; try --list-targets", name),
        };
    }
    match args.frequency {
        Some(hz) if hz.is_finite() && hz > 0.0 => {
            Ok(Some(TuningTarget::new(format!("{hz:.2} Hz"), hz)))
        }
        Some(hz) => bail!("target frequency must be positive, got {}", hz),
        None => Ok(None),
    }
}

fn open_motor(args: &Args, config: &TunerConfig) -> Option<Arc<dyn MotorDriver>> {
    let port = args.port.as_deref()?;
    if !config.motor.enabled {
        info!("Motor disabled; not opening {}", port);
        return None;
    }
    match MotorLink::open_serial(port, &config.serial) {
        Ok(link) => Some(Arc::new(link)),
        Err(e) => {
            warn!("Tensioner unavailable ({}); continuing as a plain tuner", e);
            None
        }
    }
}

fn log_report(report: &FrameReport, changed: bool) {
    let line = match (&report.note, report.frequency, report.cents) {
        (Some(note), Some(freq), Some(cents)) => format!(
            "{:<5} {:>8.2} Hz {:>+7.1} cents  {:?}/{:?}{}",
            note.to_string(),
            freq,
            cents,
            report.action,
            report.indicator,
            if report.tuning_in_progress { " [tuning]" } else { "" }
        ),
        _ => format!("{:?}", report.action),
    };

    if changed && report.action != Action::NoPitch {
        info!("{}", line);
    } else {
        debug!("{}", line);
    }
}

//! # Tuning Session Module
//!
//! Per-frame orchestration of the pitch pipeline and the motor controller.
//!
//! Every call to [`TuningSession::process_frame`] runs
//! estimator → moving average → note/cents → stability gate, publishes the
//! cents-to-target reading for a running controller, and returns a
//! [`FrameReport`] for whatever front end displays it.
//!
//! ## Modes
//! - **Chromatic**: nearest note and cents to it, no motor involvement
//! - **Target**: cents to the selected string; a stable reading outside the
//!   orange window starts a background controller run, a stable reading inside
//!   the green window marks the string completed
//!
//! A completed string receives no further motor commands until
//! [`TuningSession::reset_completed`] is called. At most one controller run
//! exists at a time since a session drives a single tensioner.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{info, warn};

use crate::config::{MotorTunables, TunerConfig};
use crate::controller::{
    direction_for, CentsFeed, ControllerSettings, TuningController, TuningOutcome,
};
use crate::motor::{Direction, MotorDriver};
use crate::pitch::FrequencyEstimator;
use crate::smoothing::SmoothingBuffer;
use crate::stability::StabilityDetector;
use crate::tuning::{cents_difference, frequency_to_note, NoteResult, TuningTarget};

#[derive(Debug, Clone, PartialEq)]
pub enum TuningMode {
    Chromatic,
    Target(TuningTarget),
}

/// What the operator should see as the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Session not started
    Idle,
    /// Silence or no detectable fundamental
    NoPitch,
    /// Chromatic mode reading
    Chromatic,
    /// Target already completed; automatic commands suppressed
    Paused,
    /// Within the green window but not yet stable
    InTuneSettling,
    WaitingForStability,
    /// Flat: the controller tightens
    Tighten,
    /// Sharp: the controller loosens
    Loosen,
    /// Stable within the green window; target completed
    InTune,
    /// Stable within the orange window
    Close,
    /// Stable and off target, but automatic tuning is unavailable
    StableNoAction,
}

/// Display colour of the reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Neutral,
    Red,
    Orange,
    Green,
}

/// State published after each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Estimate of this frame alone
    pub raw_frequency: Option<f32>,
    /// Moving average of recent estimates
    pub frequency: Option<f32>,
    pub note: Option<NoteResult>,
    /// Cents to the target (target mode) or to the nearest note (chromatic)
    pub cents: Option<f32>,
    pub target: Option<TuningTarget>,
    pub stable: bool,
    pub tuning_in_progress: bool,
    pub action: Action,
    pub indicator: Indicator,
}

impl FrameReport {
    fn empty(action: Action, tuning_in_progress: bool) -> Self {
        Self {
            raw_frequency: None,
            frequency: None,
            note: None,
            cents: None,
            target: None,
            stable: false,
            tuning_in_progress,
            action,
            indicator: Indicator::Neutral,
        }
    }
}

struct ActiveRun {
    target: String,
    cancel: Arc<AtomicBool>,
    done: Receiver<TuningOutcome>,
    handle: JoinHandle<()>,
}

pub struct TuningSession {
    config: TunerConfig,
    estimator: FrequencyEstimator,
    smoothing: SmoothingBuffer,
    stability: StabilityDetector,
    mode: TuningMode,
    completed: BTreeSet<String>,
    feed: Arc<CentsFeed>,
    motor: Option<Arc<dyn MotorDriver>>,
    run: Option<ActiveRun>,
    last_outcome: Option<TuningOutcome>,
    running: bool,
}

impl TuningSession {
    /// Creates a stopped session in chromatic mode.
    ///
    /// # Arguments
    /// * `config` - Pipeline and motor tunables
    /// * `motor` - Tensioner link, or `None` to run as a plain tuner
    pub fn new(config: TunerConfig, motor: Option<Arc<dyn MotorDriver>>) -> Self {
        Self {
            estimator: FrequencyEstimator::new(config.sample_rate, config.frame_size),
            smoothing: SmoothingBuffer::new(config.smooth_n),
            stability: StabilityDetector::new(config.stable_cents, config.stable_duration()),
            mode: TuningMode::Chromatic,
            completed: BTreeSet::new(),
            feed: Arc::new(CentsFeed::new()),
            motor,
            run: None,
            last_outcome: None,
            running: false,
            config,
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("Session started in {:?} mode", self.mode);
            self.running = true;
        }
    }

    /// Stops sampling, aborts the motor and joins an active run for at most
    /// the configured join timeout.
    pub fn stop(&mut self) {
        self.running = false;
        if let Some(motor) = &self.motor {
            motor.stop();
        }
        self.abort_run();
        info!("Session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> &TuningMode {
        &self.mode
    }

    /// Switches mode or target. A run driving the previous target is aborted
    /// before any reading against the new one is published.
    pub fn set_mode(&mut self, mode: TuningMode) {
        if self.mode != mode {
            if self.run.is_some() {
                if let Some(motor) = &self.motor {
                    motor.stop();
                }
                self.abort_run();
            }
            self.stability.reset();
            self.mode = mode;
        }
    }

    pub fn select_target(&mut self, target: TuningTarget) {
        self.set_mode(TuningMode::Target(target));
    }

    pub fn reset_completed(&mut self) {
        self.completed.clear();
        info!("Completed targets cleared");
    }

    pub fn completed_targets(&self) -> Vec<String> {
        self.completed.iter().cloned().collect()
    }

    /// Applies new motor tunables; a run already in flight keeps its own.
    pub fn set_tunables(&mut self, tunables: MotorTunables) {
        self.config.motor = tunables;
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn is_tuning(&self) -> bool {
        self.run.is_some()
    }

    pub fn last_outcome(&self) -> Option<TuningOutcome> {
        self.last_outcome
    }

    pub fn cents_feed(&self) -> Arc<CentsFeed> {
        Arc::clone(&self.feed)
    }

    /// Blocks until the active run finishes or `timeout` passes.
    pub fn wait_for_run(&mut self, timeout: Duration) -> Option<TuningOutcome> {
        let received = self.run.as_ref()?.done.recv_timeout(timeout);
        match received {
            Ok(outcome) => {
                self.finish_run(Some(outcome));
                Some(outcome)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finish_run(None);
                None
            }
            Err(RecvTimeoutError::Timeout) => None,
        }
    }

    pub fn process_frame(&mut self, frame: &[f32]) -> FrameReport {
        self.process_frame_at(frame, Instant::now())
    }

    /// Runs one polling cycle on `frame`, taken at `now`.
    pub fn process_frame_at(&mut self, frame: &[f32], now: Instant) -> FrameReport {
        self.poll_run();
        if !self.running {
            return FrameReport::empty(Action::Idle, self.is_tuning());
        }

        let raw = self.estimator.estimate(frame);
        if !(raw.is_finite() && raw > 0.0) {
            return FrameReport::empty(Action::NoPitch, self.is_tuning());
        }

        let frequency = self.smoothing.push(raw);
        let note = frequency_to_note(frequency, self.config.a4_frequency, self.config.naming);

        let mut report = FrameReport {
            raw_frequency: Some(raw),
            frequency: Some(frequency),
            note,
            ..FrameReport::empty(Action::Chromatic, false)
        };

        match self.mode.clone() {
            TuningMode::Chromatic => self.chromatic_cycle(&mut report),
            TuningMode::Target(target) => self.target_cycle(&mut report, target, now),
        }

        report.tuning_in_progress = self.is_tuning();
        report
    }

    fn chromatic_cycle(&self, report: &mut FrameReport) {
        let cents = match (&report.note, report.frequency) {
            (Some(note), Some(frequency)) => cents_difference(frequency, note.frequency),
            _ => None,
        };
        report.cents = cents;
        report.action = Action::Chromatic;
        report.indicator = match cents.map(f32::abs) {
            Some(c) if c <= self.config.green_cents => Indicator::Green,
            Some(c) if c <= self.config.orange_cents => Indicator::Orange,
            _ => Indicator::Neutral,
        };
    }

    fn target_cycle(&mut self, report: &mut FrameReport, target: TuningTarget, now: Instant) {
        let Some(frequency) = report.frequency else {
            return;
        };
        let cents = cents_difference(frequency, target.frequency).unwrap_or(0.0);
        self.feed.publish(cents);
        report.cents = Some(cents);

        if self.completed.contains(&target.label) {
            report.action = Action::Paused;
            report.indicator = Indicator::Green;
            report.target = Some(target);
            return;
        }

        let stable = self.stability.check_at(frequency, now);
        report.stable = stable;
        let off_by = cents.abs();

        let (action, indicator) = if !stable {
            if off_by <= self.config.green_cents {
                (Action::InTuneSettling, Indicator::Green)
            } else {
                (Action::WaitingForStability, Indicator::Neutral)
            }
        } else if off_by > self.config.orange_cents && self.motor_available() {
            if self.run.is_none() {
                self.launch_run(&target.label, cents);
            }
            match direction_for(cents) {
                Direction::Tighten => (Action::Tighten, Indicator::Red),
                Direction::Loosen => (Action::Loosen, Indicator::Red),
            }
        } else if off_by <= self.config.green_cents {
            if self.completed.insert(target.label.clone()) {
                info!("{} in tune ({:+.1} cents)", target.label, cents);
            }
            (Action::InTune, Indicator::Green)
        } else if off_by <= self.config.orange_cents {
            (Action::Close, Indicator::Orange)
        } else {
            (Action::StableNoAction, Indicator::Neutral)
        };

        report.action = action;
        report.indicator = indicator;
        report.target = Some(target);
    }

    fn motor_available(&self) -> bool {
        self.config.motor.enabled && self.motor.as_ref().is_some_and(|m| m.is_open())
    }

    fn launch_run(&mut self, target: &str, cents: f32) {
        let Some(motor) = self.motor.clone() else {
            return;
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let controller = TuningController::new(
            motor,
            Arc::clone(&self.feed),
            ControllerSettings::from_config(&self.config),
            Arc::clone(&cancel),
        );
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let spawned = thread::Builder::new()
            .name("tuning-run".into())
            .spawn(move || {
                let outcome = controller.run(cents);
                // the session may have detached already
                let _ = done_tx.send(outcome);
            });

        match spawned {
            Ok(handle) => {
                info!("Automatic tuning of {} started", target);
                self.run = Some(ActiveRun {
                    target: target.to_string(),
                    cancel,
                    done: done_rx,
                    handle,
                });
            }
            Err(e) => warn!("Could not start tuning run: {}", e),
        }
    }

    /// Cancels the active run and joins it for at most the join timeout.
    fn abort_run(&mut self) {
        let Some(run) = &self.run else {
            return;
        };
        run.cancel.store(true, Ordering::SeqCst);
        if self.wait_for_run(self.config.motor.join_timeout()).is_none() {
            if let Some(run) = self.run.take() {
                warn!("Tuning run for {} did not stop in time; detaching", run.target);
            }
        }
    }

    fn poll_run(&mut self) {
        let Some(run) = &self.run else {
            return;
        };
        match run.done.try_recv() {
            Ok(outcome) => self.finish_run(Some(outcome)),
            Err(TryRecvError::Disconnected) => self.finish_run(None),
            Err(TryRecvError::Empty) => {}
        }
    }

    fn finish_run(&mut self, outcome: Option<TuningOutcome>) {
        let Some(run) = self.run.take() else {
            return;
        };
        if run.handle.join().is_err() || outcome.is_none() {
            warn!("Tuning run for {} ended without an outcome", run.target);
        }
        if outcome.is_some() {
            self.last_outcome = outcome;
        }
    }
}

impl Drop for TuningSession {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.store(true, Ordering::SeqCst);
        }
    }
}

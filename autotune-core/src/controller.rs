//! # Tuning Controller Module
//!
//! Iterative motor control that drives a string towards its target pitch.
//!
//! Each iteration sizes a move from the last cents error, caps it by
//! `round(n / m²)` from the second iteration on (n = max steps per action,
//! m = iteration number), waits for the motor to finish and for a fresh cents
//! reading, and reverses part of the move when the error changed sign.
//!
//! The string's response to a motor step is unknown and differs per string,
//! so the controller does not estimate a gain. The shrinking cap bounds how far
//! a later move can overshoot and the reversal handles the crossings.
//!
//! A run is one-shot: it ends on convergence, on the iteration budget, or on
//! the first failure, and is never restarted by itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::TunerConfig;
use crate::motor::{Direction, MotorDriver};
use crate::slot::Slot;

/// Latest cents-to-target reading published by the pitch pipeline.
pub type CentsFeed = Slot<f32>;

/// Longest the controller waits on the feed before rechecking cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    /// Largest move per command ("n").
    pub max_steps: u32,
    pub cents_per_step: f32,
    pub step_timeout: Duration,
    pub max_iterations: u32,
    /// A reading within this many cents ends the run successfully.
    pub in_tune_cents: f32,
    pub fresh_reading_timeout: Duration,
    pub settle: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &TunerConfig) -> Self {
        let motor = &config.motor;
        Self {
            max_steps: motor.max_steps,
            cents_per_step: motor.cents_per_step,
            step_timeout: motor.step_timeout(),
            max_iterations: motor.max_iterations,
            in_tune_cents: config.green_cents,
            fresh_reading_timeout: motor.fresh_reading_timeout(),
            settle: motor.settle(),
        }
    }

    /// "n", never below one step.
    fn n(&self) -> u32 {
        self.max_steps.max(1)
    }

    fn cents_per_step(&self) -> f32 {
        if self.cents_per_step.is_finite() && self.cents_per_step > 0.0 {
            self.cents_per_step
        } else {
            1.0
        }
    }
}

/// How a controller run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningOutcome {
    /// The last reading was within the in-tune window.
    Converged { iterations: u32, cents: f32 },
    /// Every iteration was used without converging.
    BudgetExhausted { cents: f32 },
    /// The step computation produced nothing to do.
    NoUsefulMove { iteration: u32 },
    /// The motor did not acknowledge a move in time, or the link is down.
    CommandFailed { iteration: u32 },
    /// No fresh cents reading arrived after a move.
    NoReading { iteration: u32 },
    /// The session asked the run to stop.
    Cancelled { iteration: u32 },
}

impl TuningOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, TuningOutcome::Converged { .. })
    }
}

/// Cap applied from the second iteration on, and the size of an overshoot
/// reversal: `max(1, round(n / m²))`.
pub fn shrink_cap(max_steps: u32, iteration: u32) -> u32 {
    let m = iteration.max(1) as f64;
    let cap = (max_steps as f64 / (m * m)).round() as u32;
    cap.max(1)
}

/// Steps for iteration `iteration` given the previous cents error.
pub fn planned_steps(prev_cents: f32, iteration: u32, settings: &ControllerSettings) -> u32 {
    let n = settings.n();
    let suggested = (prev_cents.abs() / settings.cents_per_step()).round();
    let mut steps = if suggested.is_nan() || suggested <= 0.0 {
        n
    } else {
        n.min(suggested.min(u32::MAX as f32) as u32)
    };

    if iteration > 1 {
        steps = steps.min(shrink_cap(n, iteration));
    }
    steps
}

/// Flat readings need a tighter string.
pub fn direction_for(cents: f32) -> Direction {
    if cents < 0.0 {
        Direction::Tighten
    } else {
        Direction::Loosen
    }
}

fn crossed_zero(prev: f32, new: f32) -> bool {
    (prev < 0.0 && new > 0.0) || (prev > 0.0 && new < 0.0)
}

pub struct TuningController {
    motor: Arc<dyn MotorDriver>,
    feed: Arc<CentsFeed>,
    settings: ControllerSettings,
    cancel: Arc<AtomicBool>,
}

impl TuningController {
    pub fn new(
        motor: Arc<dyn MotorDriver>,
        feed: Arc<CentsFeed>,
        settings: ControllerSettings,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            motor,
            feed,
            settings,
            cancel,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Runs the control loop starting from `initial_cents`. Blocks until done.
    pub fn run(&self, initial_cents: f32) -> TuningOutcome {
        info!("Tuning run started at {:+.1} cents", initial_cents);
        let outcome = self.iterate(initial_cents);
        info!("Tuning run finished: {:?}", outcome);
        outcome
    }

    fn iterate(&self, initial_cents: f32) -> TuningOutcome {
        let n = self.settings.n();
        let mut prev_cents = initial_cents;

        for iteration in 1..=self.settings.max_iterations {
            if self.cancelled() {
                return TuningOutcome::Cancelled { iteration };
            }

            let steps = planned_steps(prev_cents, iteration, &self.settings);
            if steps == 0 {
                return TuningOutcome::NoUsefulMove { iteration };
            }

            let direction = direction_for(prev_cents);
            debug!(
                "Iteration {}: {:+.1} cents -> {:?} {} steps",
                iteration, prev_cents, direction, steps
            );

            // readings published from here on count as fresh
            let seen = self.feed.version();
            if !self
                .motor
                .send_move(direction, steps, self.settings.step_timeout)
            {
                warn!("Move {:?} {} failed; ending run", direction, steps);
                return TuningOutcome::CommandFailed { iteration };
            }

            let Some(new_cents) = self.fresh_reading(seen) else {
                if self.cancelled() {
                    return TuningOutcome::Cancelled { iteration };
                }
                warn!("No fresh reading after move; ending run");
                return TuningOutcome::NoReading { iteration };
            };
            if self.cancelled() {
                return TuningOutcome::Cancelled { iteration };
            }

            if crossed_zero(prev_cents, new_cents) {
                let reverse_steps = shrink_cap(n, iteration);
                debug!(
                    "Overshoot ({:+.1} -> {:+.1}), reversing {} steps",
                    prev_cents, new_cents, reverse_steps
                );
                if !self.motor.send_move(
                    direction.reverse(),
                    reverse_steps,
                    self.settings.step_timeout,
                ) {
                    warn!("Overshoot reversal failed; ending run");
                    return TuningOutcome::CommandFailed { iteration };
                }
            }

            if new_cents.abs() <= self.settings.in_tune_cents {
                return TuningOutcome::Converged {
                    iterations: iteration,
                    cents: new_cents,
                };
            }

            prev_cents = new_cents;
        }

        TuningOutcome::BudgetExhausted { cents: prev_cents }
    }

    fn fresh_reading(&self, seen: u64) -> Option<f32> {
        if !self.settings.settle.is_zero() {
            std::thread::sleep(self.settings.settle);
        }
        let deadline = Instant::now() + self.settings.fresh_reading_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(reading) = self.feed.wait_newer(seen, remaining.min(CANCEL_POLL)) {
                return Some(reading.value);
            }
            if self.cancelled() || Instant::now() >= deadline {
                return None;
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

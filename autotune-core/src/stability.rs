//! # Stability Gate
//!
//! Decides whether the smoothed pitch has settled. A reading becomes the
//! *candidate*; later readings within `threshold_cents` of it keep the
//! candidate (and its start time) alive, anything further away replaces it.
//! A candidate that has survived for at least `required` is reported stable.
//!
//! This keeps jitter and momentary crossings of the target from being taken
//! as a settled measurement.

use std::time::{Duration, Instant};

use crate::tuning::cents_difference;

#[derive(Debug, Clone)]
pub struct StabilityDetector {
    threshold_cents: f32,
    required: Duration,
    candidate: Option<f32>,
    since: Option<Instant>,
}

impl StabilityDetector {
    pub fn new(threshold_cents: f32, required: Duration) -> Self {
        Self {
            threshold_cents,
            required,
            candidate: None,
            since: None,
        }
    }

    /// Feeds a reading taken now.
    pub fn check(&mut self, frequency: f32) -> bool {
        self.check_at(frequency, Instant::now())
    }

    /// Feeds a reading taken at `now` and reports whether the candidate has
    /// been held long enough.
    pub fn check_at(&mut self, frequency: f32, now: Instant) -> bool {
        let (Some(candidate), Some(since)) = (self.candidate, self.since) else {
            self.restart(frequency, now);
            return false;
        };

        match cents_difference(frequency, candidate) {
            Some(cents) if cents.is_finite() && cents.abs() <= self.threshold_cents => {
                now.saturating_duration_since(since) >= self.required
            }
            _ => {
                self.restart(frequency, now);
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.candidate = None;
        self.since = None;
    }

    pub fn candidate(&self) -> Option<f32> {
        self.candidate
    }

    pub fn candidate_since(&self) -> Option<Instant> {
        self.since
    }

    fn restart(&mut self, frequency: f32, now: Instant) {
        self.candidate = Some(frequency);
        self.since = Some(now);
    }
}

//! # Pitch Detection Module
//!
//! Fundamental-frequency estimation by windowed autocorrelation.
//!
//! ## Algorithm
//! 1. Non-finite samples are replaced by zero; a frame that is silent within
//!    floating tolerance reports "no pitch" straight away
//! 2. DC offset removal and Hann windowing
//! 3. Autocorrelation for every non-negative lag
//! 4. The lag search starts at the first lag where the correlation turns
//!    upward again, which skips the lag-0 peak and its decay
//! 5. The highest correlation from there on gives the period
//!
//! The first-upturn floor decides which harmonic is reported as fundamental,
//! so it is applied to the exact correlation sequence without interpolation.

use crate::fft::{apply_hann_window, remove_dc_offset, Autocorrelator};

/// Value returned when no fundamental can be estimated.
pub const NO_PITCH: f32 = 0.0;

/// Samples at or below this magnitude count as silence.
const SILENCE_TOLERANCE: f64 = 1e-8;

/// Autocorrelation pitch estimator for frames at a fixed sample rate.
///
/// Keeps the FFT plans and scratch space between calls; the plans are rebuilt
/// if a frame of a different length arrives.
pub struct FrequencyEstimator {
    sample_rate: f32,
    correlator: Autocorrelator,
    scratch: Vec<f64>,
}

impl FrequencyEstimator {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            correlator: Autocorrelator::new(frame_size),
            scratch: Vec::with_capacity(frame_size),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Estimates the fundamental frequency of one frame.
    ///
    /// # Arguments
    /// * `frame` - Mono samples at the estimator's sample rate
    ///
    /// # Returns
    /// * Frequency in Hz, or [`NO_PITCH`] for silence, frames shorter than two
    ///   samples, or correlations that never turn upward
    pub fn estimate(&mut self, frame: &[f32]) -> f32 {
        if frame.len() < 2 {
            return NO_PITCH;
        }

        self.scratch.clear();
        self.scratch.extend(frame.iter().map(|&s| {
            if s.is_finite() { s as f64 } else { 0.0 }
        }));

        if self.scratch.iter().all(|s| s.abs() <= SILENCE_TOLERANCE) {
            return NO_PITCH;
        }

        remove_dc_offset(&mut self.scratch);
        apply_hann_window(&mut self.scratch);

        if self.correlator.frame_len() < self.scratch.len() {
            self.correlator = Autocorrelator::new(self.scratch.len());
        }
        let corr = self.correlator.autocorrelate(&self.scratch);

        match fundamental_lag(&corr) {
            Some(lag) => self.sample_rate / lag as f32,
            None => NO_PITCH,
        }
    }
}

/// Picks the period lag from an autocorrelation sequence.
///
/// Returns `None` when the sequence never increases or the best lag is zero.
pub fn fundamental_lag(corr: &[f64]) -> Option<usize> {
    let start = corr.windows(2).position(|w| w[1] - w[0] > 0.0)?;

    // first index of the maximum, like numpy's argmax
    let mut peak = start;
    let mut best = corr[start];
    for (lag, &value) in corr.iter().enumerate().skip(start + 1) {
        if value > best {
            best = value;
            peak = lag;
        }
    }

    if peak == 0 { None } else { Some(peak) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::autocorrelate_direct;

    const FS: u32 = 44_100;
    const N: usize = 4096;

    fn generate_sine(freq: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_has_no_pitch() {
        let mut estimator = FrequencyEstimator::new(FS, N);
        assert_eq!(estimator.estimate(&vec![0.0; N]), NO_PITCH);
        assert_eq!(estimator.estimate(&vec![1e-9; N]), NO_PITCH);
        assert_eq!(estimator.estimate(&[]), NO_PITCH);
    }

    #[test]
    fn non_finite_samples_are_treated_as_zero() {
        let mut estimator = FrequencyEstimator::new(FS, N);
        let frame = vec![f32::NAN; N];
        assert_eq!(estimator.estimate(&frame), NO_PITCH);

        let mut sine = generate_sine(220.0, FS, N);
        sine[10] = f32::INFINITY;
        sine[500] = f32::NAN;
        let freq = estimator.estimate(&sine);
        assert!((freq - 220.0).abs() < 2.0, "Expected ~220 Hz, got {}", freq);
    }

    #[test]
    fn pure_sines_land_within_one_bin() {
        let bin = FS as f32 / N as f32;
        let mut estimator = FrequencyEstimator::new(FS, N);
        for &f0 in &[82.41_f32, 110.0, 146.83, 196.0, 246.94, 329.63, 440.0] {
            let freq = estimator.estimate(&generate_sine(f0, FS, N));
            assert!(
                (freq - f0).abs() <= bin,
                "Expected {} Hz within {} Hz, got {}",
                f0,
                bin,
                freq
            );
        }
    }

    #[test]
    fn harmonic_rich_tone_reports_fundamental() {
        let samples: Vec<f32> = (0..N)
            .map(|i| {
                let t = i as f32 / FS as f32;
                (2.0 * std::f32::consts::PI * 110.0 * t).sin()
                    + 0.6 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 330.0 * t).sin()
            })
            .collect();
        let mut estimator = FrequencyEstimator::new(FS, N);
        let freq = estimator.estimate(&samples);
        assert!((freq - 110.0).abs() < 2.0, "Expected ~110 Hz, got {}", freq);
    }

    #[test]
    fn longer_frame_replans() {
        let mut estimator = FrequencyEstimator::new(FS, 1024);
        let freq = estimator.estimate(&generate_sine(110.0, FS, N));
        assert!((freq - 110.0).abs() < 2.0, "Expected ~110 Hz, got {}", freq);
    }

    #[test]
    fn lag_floor_is_first_upturn() {
        // decays to index 2, rises, peaks at 4; the later equal peak is ignored
        let corr = [10.0, 4.0, 1.0, 3.0, 6.0, 2.0, 6.0];
        assert_eq!(fundamental_lag(&corr), Some(4));
    }

    #[test]
    fn monotone_decay_has_no_lag() {
        assert_eq!(fundamental_lag(&[5.0, 4.0, 3.0, 3.0, 1.0]), None);
        assert_eq!(fundamental_lag(&[]), None);
    }

    #[test]
    fn lag_choice_matches_direct_correlation() {
        let mut signal: Vec<f64> = generate_sine(196.0, FS, 2048)
            .into_iter()
            .map(f64::from)
            .collect();
        remove_dc_offset(&mut signal);
        apply_hann_window(&mut signal);

        let mut correlator = Autocorrelator::new(signal.len());
        let fast = fundamental_lag(&correlator.autocorrelate(&signal));
        let slow = fundamental_lag(&autocorrelate_direct(&signal));
        assert_eq!(fast, slow);
    }
}

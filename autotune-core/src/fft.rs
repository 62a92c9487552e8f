//! # Fast Fourier Transform (FFT) Module
//!
//! Signal conditioning and transform-domain autocorrelation used by the pitch
//! estimator.
//!
//! ## Features
//! - DC offset removal
//! - Hann windowing for reduced edge artifacts
//! - Linear (non-circular) autocorrelation through RustFFT, with the plans
//!   cached for the frame length in use

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f64]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f64>() / len as f64;
    for sample in signal.iter_mut() {
        *sample -= avg;
    }
}

/// Applies a symmetric Hann window, tapering both ends of the frame to zero.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
pub fn apply_hann_window(buffer: &mut [f64]) {
    let n = buffer.len();
    if n < 2 {
        // numpy's hanning(1) is [1.0]; nothing to taper
        return;
    }
    let n_minus_1 = (n - 1) as f64;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Computes autocorrelation for non-negative lags via the Wiener-Khinchin
/// theorem.
///
/// The input is zero-padded to a power of two of at least `2N - 1` samples so
/// that the circular correlation of the padded buffer equals the linear one.
pub struct Autocorrelator {
    frame_len: usize,
    fft_len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex<f64>>,
}

impl Autocorrelator {
    pub fn new(frame_len: usize) -> Self {
        let fft_len = (2 * frame_len.max(1) - 1).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            frame_len,
            fft_len,
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
            buffer: vec![Complex::new(0.0, 0.0); fft_len],
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Returns `r[k] = sum_i x[i] * x[i + k]` for `k` in `0..signal.len()`.
    ///
    /// # Panics
    /// * If `signal` is longer than the frame length this instance was planned for
    pub fn autocorrelate(&mut self, signal: &[f64]) -> Vec<f64> {
        assert!(
            signal.len() <= self.frame_len,
            "signal of {} samples exceeds planned frame length {}",
            signal.len(),
            self.frame_len
        );

        for (slot, &sample) in self.buffer.iter_mut().zip(signal.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        for slot in self.buffer.iter_mut().skip(signal.len()) {
            *slot = Complex::new(0.0, 0.0);
        }

        self.forward.process(&mut self.buffer);
        for bin in self.buffer.iter_mut() {
            *bin = Complex::new(bin.norm_sqr(), 0.0);
        }
        self.inverse.process(&mut self.buffer);

        // rustfft does not normalise the inverse transform
        let scale = 1.0 / self.fft_len as f64;
        self.buffer
            .iter()
            .take(signal.len())
            .map(|c| c.re * scale)
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn autocorrelate_direct(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    (0..n)
        .map(|lag| (0..n - lag).map(|i| signal[i] * signal[i + lag]).sum())
        .collect()
}

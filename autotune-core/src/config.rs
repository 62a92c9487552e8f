//! # Configuration Module
//!
//! All tunables of the pitch pipeline, the stability gate, the tuning controller
//! and the serial link live in one [`TunerConfig`] value that is handed to the
//! constructors. Nothing in the crate reads process-wide globals, so several
//! sessions (or tests) can run side by side with independent settings.
//!
//! Configs are stored as JSON. Every field has a default, so a file only needs
//! to list the values it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TunerError, TunerResult};
use crate::tuning::NoteNaming;

/// Top-level configuration for a tuning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Sample rate of the incoming audio frames in Hz.
    pub sample_rate: u32,
    /// Number of samples per analysis frame.
    pub frame_size: usize,
    /// Interval between foreground polling cycles.
    pub update_interval_ms: u64,
    /// Number of estimates in the moving average.
    pub smooth_n: usize,
    /// Reference pitch of A4 in Hz.
    pub a4_frequency: f32,
    /// Outside this many cents a stable reading triggers the motor.
    pub orange_cents: f32,
    /// Within this many cents a string counts as in tune.
    pub green_cents: f32,
    /// How long a reading must hold before it is treated as settled.
    pub stable_ms: u64,
    /// Cents window a reading may wander in while staying the same candidate.
    pub stable_cents: f32,
    /// Pitch-class names used in published notes.
    pub naming: NoteNaming,
    pub motor: MotorTunables,
    pub serial: SerialSettings,
}

/// Operator-adjustable motor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorTunables {
    /// Calibration: how many cents one motor step moves the pitch.
    pub cents_per_step: f32,
    /// Largest move issued in a single command ("n").
    pub max_steps: u32,
    /// How long to wait for a `DONE` acknowledgement.
    pub step_timeout_ms: u64,
    /// Automatic tuning on/off.
    pub enabled: bool,
    /// Iteration budget of one controller run.
    pub max_iterations: u32,
    /// Ceiling on the wait for a fresh cents reading after a move.
    pub fresh_reading_timeout_ms: u64,
    /// Pause after a move before a reading is accepted.
    pub settle_ms: u64,
    /// Bound on joining an in-flight run during shutdown.
    pub join_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 4096,
            update_interval_ms: 120,
            smooth_n: 5,
            a4_frequency: 440.0,
            orange_cents: 20.0,
            green_cents: 5.0,
            stable_ms: 1000,
            stable_cents: 8.0,
            naming: NoteNaming::Solfege,
            motor: MotorTunables::default(),
            serial: SerialSettings::default(),
        }
    }
}

impl Default for MotorTunables {
    fn default() -> Self {
        Self {
            cents_per_step: 1.0,
            max_steps: 50,
            step_timeout_ms: 8000,
            enabled: true,
            max_iterations: 10,
            fresh_reading_timeout_ms: 1000,
            settle_ms: 120,
            join_timeout_ms: 2000,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

impl TunerConfig {
    /// Reads a JSON config file and validates it.
    pub fn load(path: impl AsRef<Path>) -> TunerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(TunerError::Config)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> TunerResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> TunerResult<()> {
        if self.sample_rate == 0 {
            return Err(TunerError::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.frame_size < 2 {
            return Err(TunerError::InvalidConfig(format!(
                "frame_size must be at least 2, got {}",
                self.frame_size
            )));
        }
        if self.smooth_n == 0 {
            return Err(TunerError::InvalidConfig("smooth_n must be at least 1".into()));
        }
        if !(self.a4_frequency.is_finite() && self.a4_frequency > 0.0) {
            return Err(TunerError::InvalidConfig(format!(
                "a4_frequency must be positive, got {}",
                self.a4_frequency
            )));
        }
        if self.green_cents > self.orange_cents {
            return Err(TunerError::InvalidConfig(format!(
                "green_cents ({}) must not exceed orange_cents ({})",
                self.green_cents, self.orange_cents
            )));
        }
        if !(self.motor.cents_per_step.is_finite() && self.motor.cents_per_step > 0.0) {
            return Err(TunerError::InvalidConfig(format!(
                "motor.cents_per_step must be positive, got {}",
                self.motor.cents_per_step
            )));
        }
        if self.motor.max_steps == 0 {
            return Err(TunerError::InvalidConfig("motor.max_steps must be at least 1".into()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn stable_duration(&self) -> Duration {
        Duration::from_millis(self.stable_ms)
    }
}

impl MotorTunables {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn fresh_reading_timeout(&self) -> Duration {
        Duration::from_millis(self.fresh_reading_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TunerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.motor.max_steps, 50);
        assert_eq!(config.serial.baud_rate, 115_200);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TunerConfig::from_json(
            r#"{ "smooth_n": 8, "naming": "Letter", "motor": { "max_steps": 20 } }"#,
        )
        .unwrap();
        assert_eq!(config.smooth_n, 8);
        assert_eq!(config.naming, NoteNaming::Letter);
        assert_eq!(config.motor.max_steps, 20);
        assert_eq!(config.motor.step_timeout_ms, 8000);
        assert_eq!(config.frame_size, 4096);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = TunerConfig::from_json(r#"{ "green_cents": 30.0 }"#).unwrap_err();
        assert!(matches!(err, TunerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_degenerate_motor_tunables() {
        let err = TunerConfig::from_json(r#"{ "motor": { "cents_per_step": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, TunerError::InvalidConfig(_)));
        let err = TunerConfig::from_json(r#"{ "motor": { "max_steps": 0 } }"#).unwrap_err();
        assert!(matches!(err, TunerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = TunerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, TunerError::ConfigParse(_)));
    }
}

// autotune-core/src/lib.rs

//! The core logic for the motorised string tuner.
//! This crate estimates pitch from audio frames, maps it to notes and cents,
//! and drives a stepper-motor tensioner over a serial link until a string
//! reaches its target. It is completely headless and contains no UI code.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod fft;
pub mod motor;
pub mod pitch;
pub mod session;
pub mod slot;
pub mod smoothing;
pub mod stability;
pub mod tuning;

pub use config::{MotorTunables, SerialSettings, TunerConfig};
pub use controller::{CentsFeed, ControllerSettings, TuningController, TuningOutcome};
pub use error::{TunerError, TunerResult};
pub use motor::{Direction, MotorCommand, MotorDriver, MotorLink};
pub use pitch::{FrequencyEstimator, NO_PITCH};
pub use session::{Action, FrameReport, Indicator, TuningMode, TuningSession};
pub use tuning::{NoteNaming, NoteResult, TuningTarget};

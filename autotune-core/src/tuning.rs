//! # Musical Tuning Module
//!
//! Equal-temperament note mapping and cent deviation measurements.
//!
//! ## Features
//! - Frequency to nearest note (name, octave, exact reference frequency)
//! - Cent deviation between two frequencies
//! - Letter or solfège pitch-class names
//! - Standard six-string guitar tuning targets

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

const LETTER_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const SOLFEGE_NAMES: [&str; 12] = [
    "Do", "Do#", "Re", "Re#", "Mi", "Fa", "Fa#", "Sol", "Sol#", "La", "La#", "Si",
];

/// Semitones from C up to A; shifts the A4-relative semitone into the
/// C-based pitch-class table and octave numbering.
const A_CLASS_OFFSET: i32 = 9;

/// Which set of pitch-class names to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteNaming {
    /// C, C#, D ...
    Letter,
    /// Do, Do#, Re ...
    #[default]
    Solfege,
}

impl NoteNaming {
    pub fn names(self) -> &'static [&'static str; 12] {
        match self {
            NoteNaming::Letter => &LETTER_NAMES,
            NoteNaming::Solfege => &SOLFEGE_NAMES,
        }
    }
}

/// The equal-tempered note nearest to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteResult {
    /// Pitch-class name (e.g., "A", "Sol#")
    pub name: &'static str,
    pub octave: i32,
    /// Exact frequency of the note in Hz
    pub frequency: f32,
}

impl std::fmt::Display for NoteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

/// Finds the equal-tempered note closest to a frequency.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
/// * `a4` - Reference frequency of A4 in Hz
/// * `naming` - Pitch-class name table
///
/// # Returns
/// * `Some(note)` - Nearest note and its exact frequency
/// * `None` - `freq` is not a positive finite number
pub fn frequency_to_note(freq: f32, a4: f32, naming: NoteNaming) -> Option<NoteResult> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }

    let semitone = (12.0 * (freq / a4).log2()).round() as i32;
    let class_index = (semitone + A_CLASS_OFFSET).rem_euclid(12) as usize;
    let octave = 4 + (semitone + A_CLASS_OFFSET).div_euclid(12);
    let frequency = a4 * 2.0_f32.powf(semitone as f32 / 12.0);

    Some(NoteResult {
        name: naming.names()[class_index],
        octave,
        frequency,
    })
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// Returns `None` when either frequency is not positive.
pub fn cents_difference(freq: f32, target_freq: f32) -> Option<f32> {
    if !(freq > 0.0 && target_freq > 0.0) || !freq.is_finite() || !target_freq.is_finite() {
        return None;
    }
    Some(1200.0 * (freq / target_freq).log2())
}

/// A reference pitch selected by the operator, e.g. one guitar string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningTarget {
    pub label: String,
    pub frequency: f32,
}

impl TuningTarget {
    pub fn new(label: impl Into<String>, frequency: f32) -> Self {
        Self {
            label: label.into(),
            frequency,
        }
    }
}

/// Open strings of a guitar in standard tuning, low to high.
static STANDARD_GUITAR: Lazy<Vec<TuningTarget>> = Lazy::new(|| {
    let strings: [(&str, f32); 6] = [
        ("6 - E2", 82.406_89),
        ("5 - A2", 110.0),
        ("4 - D3", 146.832_38),
        ("3 - G3", 195.997_72),
        ("2 - B3", 246.941_65),
        ("1 - E4", 329.627_56),
    ];
    strings
        .into_iter()
        .map(|(label, frequency)| TuningTarget::new(label, frequency))
        .collect()
});

pub fn standard_guitar() -> &'static [TuningTarget] {
    &STANDARD_GUITAR
}

/// Looks up a standard guitar string by label or by its note (e.g. "A2").
pub fn find_guitar_string(name: &str) -> Option<&'static TuningTarget> {
    STANDARD_GUITAR
        .iter()
        .find(|t| t.label == name || t.label.ends_with(&format!(" {name}")))
}

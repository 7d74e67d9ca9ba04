// Measurement and metadata models shared across the engine, the event
// surface, and the document store. These are the serde boundary: field names
// serialize in camelCase to match the measurement document schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::physics;

/// Piano body type, set once per session with the rest of the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PianoType {
    Spinet,
    Console,
    ProfessionalUpright,
    BabyGrand,
    ParlorGrand,
    SemiConcertGrand,
    ConcertGrand,
    Unknown,
}

impl PianoType {
    /// Map a host dropdown index to a canonical type.
    ///
    /// Index 2 ("Studio") deliberately coarsens to `Console`: studio uprights
    /// share the console scale design closely enough that the measurement
    /// model does not distinguish them. The document schema inherits this
    /// coarsening.
    pub fn from_selector_index(index: usize) -> PianoType {
        match index {
            0 => PianoType::Spinet,
            1 | 2 => PianoType::Console,
            3 => PianoType::ProfessionalUpright,
            4 => PianoType::BabyGrand,
            5 => PianoType::ParlorGrand,
            6 => PianoType::SemiConcertGrand,
            7 => PianoType::ConcertGrand,
            _ => PianoType::Unknown,
        }
    }
}

/// Session-level piano description. The scale break drives the analyzer's
/// wound/plain string handling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PianoMetadata {
    pub piano_type: PianoType,
    /// Overall length (grands) or height (uprights) in centimeters.
    pub length_cm: f64,
    /// The note at which wound bass strings yield to plain steel strings.
    pub scale_break_midi: u8,
}

impl PianoMetadata {
    /// Validate the metadata ranges: length 80..=300 cm, scale break 36..=54.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(80.0..=300.0).contains(&self.length_cm) {
            return Err(ConfigError::LengthOutOfRange(self.length_cm));
        }
        if !(36..=54).contains(&self.scale_break_midi) {
            return Err(ConfigError::ScaleBreakOutOfRange(self.scale_break_midi));
        }
        Ok(())
    }
}

/// Measurement quality classification, from the detected partial count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Red,
    Orange,
    Green,
}

impl Quality {
    /// Ranking score for measurement selection.
    pub fn score(self) -> u8 {
        match self {
            Quality::Green => 3,
            Quality::Orange => 2,
            Quality::Red => 1,
        }
    }
}

/// One detected partial of a struck note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Partial number, n >= 1.
    pub n: u32,
    /// Measured frequency in Hz.
    pub frequency: f64,
    /// Amplitude in dB (20 * log10 of linear magnitude).
    pub amplitude: f64,
}

/// A complete per-note measurement record.
///
/// Partials are listed with strictly increasing n. The record is only emitted
/// when `calculated_fundamental` lies within the target's +/-50-cent window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMeasurement {
    pub midi_index: u8,
    pub note_name: String,
    pub target_frequency: f64,
    /// The mathematical first partial of the inharmonic series.
    pub calculated_fundamental: f64,
    pub inharmonicity_coefficient: f64,
    /// Partial number actually used as the anchor for f0 extraction.
    pub measured_partial_number: u32,
    pub quality: Quality,
    pub detected_partials: Vec<PartialResult>,
    pub measured_at: DateTime<Utc>,
}

/// Linear magnitude spectrum emitted for external visualizers, one per FFT.
#[derive(Debug, Clone)]
pub struct SpectrumSnapshot {
    /// Linear magnitudes, length FFT_OUTPUT_LEN / 2.
    pub magnitudes: Vec<f32>,
    /// Frequency resolution in Hz per bin.
    pub bin_hz: f64,
    pub target_frequency: f64,
    pub target_midi: u8,
    pub note_name: String,
    pub captured_at: DateTime<Utc>,
}

/// The note currently being measured: MIDI index, its equal-temperament
/// frequency, and the precomputed +/-50-cent accept window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTarget {
    pub midi: u8,
    pub frequency: f64,
    pub accept_min_hz: f64,
    pub accept_max_hz: f64,
}

impl NoteTarget {
    /// Build a validated target. The frequency must agree with equal
    /// temperament (A4 = 440 Hz) within 1 part in 10^4.
    pub fn new(midi: u8, frequency: f64) -> Result<NoteTarget, ConfigError> {
        if !(physics::MIDI_MIN..=physics::MIDI_MAX).contains(&midi) {
            return Err(ConfigError::MidiOutOfRange(midi));
        }
        let expected = physics::midi_to_frequency(midi);
        if frequency <= 0.0 || ((frequency / expected) - 1.0).abs() > 1e-4 {
            return Err(ConfigError::FrequencyMismatch { midi, expected, got: frequency });
        }
        let half_window = (50.0 / 1200.0f64).exp2();
        Ok(NoteTarget {
            midi,
            frequency,
            accept_min_hz: frequency / half_window,
            accept_max_hz: frequency * half_window,
        })
    }

    /// True when a measured fundamental falls inside the accept window.
    pub fn accepts(&self, f0: f64) -> bool {
        (self.accept_min_hz..=self.accept_max_hz).contains(&f0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_index_coarsens_studio_to_console() {
        assert_eq!(PianoType::from_selector_index(1), PianoType::Console);
        assert_eq!(PianoType::from_selector_index(2), PianoType::Console);
        assert_eq!(PianoType::from_selector_index(0), PianoType::Spinet);
        assert_eq!(PianoType::from_selector_index(7), PianoType::ConcertGrand);
        assert_eq!(PianoType::from_selector_index(42), PianoType::Unknown);
    }

    #[test]
    fn test_metadata_validation() {
        let good = PianoMetadata {
            piano_type: PianoType::BabyGrand,
            length_cm: 150.0,
            scale_break_midi: 48,
        };
        assert!(good.validate().is_ok());

        let short = PianoMetadata { length_cm: 50.0, ..good };
        assert!(matches!(short.validate(), Err(ConfigError::LengthOutOfRange(_))));

        let bad_break = PianoMetadata { scale_break_midi: 60, ..good };
        assert!(matches!(bad_break.validate(), Err(ConfigError::ScaleBreakOutOfRange(_))));
    }

    #[test]
    fn test_quality_ranking() {
        assert!(Quality::Green.score() > Quality::Orange.score());
        assert!(Quality::Orange.score() > Quality::Red.score());
    }

    #[test]
    fn test_note_target_validation() {
        assert!(NoteTarget::new(69, 440.0).is_ok());
        // Within 1 part in 1e4 of equal temperament is fine
        assert!(NoteTarget::new(72, 523.25).is_ok());
        // A semitone off is rejected
        assert!(matches!(
            NoteTarget::new(69, 466.16),
            Err(ConfigError::FrequencyMismatch { .. })
        ));
        assert!(matches!(NoteTarget::new(20, 25.96), Err(ConfigError::MidiOutOfRange(20))));
        assert!(matches!(NoteTarget::new(109, 4434.92), Err(ConfigError::MidiOutOfRange(109))));
    }

    #[test]
    fn test_accept_window_is_50_cents() {
        let target = NoteTarget::new(69, 440.0).unwrap();
        assert!(target.accepts(440.0));
        assert!(target.accepts(428.0)); // -48 cents
        assert!(target.accepts(452.0)); // +47 cents
        assert!(!target.accepts(426.0)); // -56 cents
        assert!(!target.accepts(454.0)); // +54 cents
    }
}

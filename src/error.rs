// Error types for the measurement engine.
//
// Configuration problems are surfaced synchronously from the control surface
// and leave analyzer state untouched. DSP-internal numerical edge cases are
// never errors; they fall back inline (bin center, register prior, slope
// analysis). Persistence and capture failures propagate to the caller.

use std::fmt;

/// Errors returned by the analyzer control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// MIDI index outside the piano range 21..=108.
    MidiOutOfRange(u8),
    /// Target frequency disagrees with equal temperament (A4 = 440 Hz)
    /// by more than 1 part in 10^4.
    FrequencyMismatch { midi: u8, expected: f64, got: f64 },
    /// Piano length outside 80..=300 cm.
    LengthOutOfRange(f64),
    /// Scale-break MIDI index outside 36..=54.
    ScaleBreakOutOfRange(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MidiOutOfRange(midi) => {
                write!(f, "MIDI index {} outside piano range 21..=108", midi)
            }
            ConfigError::FrequencyMismatch { midi, expected, got } => write!(
                f,
                "frequency {:.4} Hz does not match equal temperament {:.4} Hz for MIDI {}",
                got, expected, midi
            ),
            ConfigError::LengthOutOfRange(cm) => {
                write!(f, "piano length {:.1} cm outside 80..=300 cm", cm)
            }
            ConfigError::ScaleBreakOutOfRange(midi) => {
                write!(f, "scale break MIDI {} outside 36..=54", midi)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors from the measurement document store.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying file I/O failed.
    Io(std::io::Error),
    /// The document is not valid JSON or is missing required fields.
    Corrupt(serde_json::Error),
    /// The document carries a schema version this build cannot read.
    SchemaMismatch { found: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "measurement document I/O error: {}", e),
            StoreError::Corrupt(e) => write!(f, "corrupt measurement document: {}", e),
            StoreError::SchemaMismatch { found } => {
                write!(f, "unsupported measurement document schema version: {}", found)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Corrupt(e) => Some(e),
            StoreError::SchemaMismatch { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Errors from the audio capture collaborator.
#[derive(Debug)]
pub enum CaptureError {
    /// The engine only analyzes 96 kHz input; any other rate is refused.
    UnsupportedSampleRate(u32),
    /// The named capture device was not found.
    DeviceNotFound(String),
    /// No capture device is available at all.
    NoDevice,
    /// The device offers no input configuration the engine can use.
    NoUsableConfig,
    /// Opening or starting the stream failed.
    Stream(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::UnsupportedSampleRate(rate) => {
                write!(f, "unsupported capture sample rate {} Hz (engine requires 96000)", rate)
            }
            CaptureError::DeviceNotFound(name) => write!(f, "capture device '{}' not found", name),
            CaptureError::NoDevice => write!(f, "no capture device available"),
            CaptureError::NoUsableConfig => write!(f, "no usable input configuration on device"),
            CaptureError::Stream(msg) => write!(f, "capture stream error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

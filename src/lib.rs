// Piano tuning measurement engine.
//
// Feed mono 96 kHz sample blocks to a NoteAnalyzer while a single note is
// struck: it detects the note's partials via an adaptive zero-padded FFT,
// recovers the true string fundamental under inharmonicity, estimates the
// inharmonicity coefficient B, classifies measurement quality, and emits
// per-note measurement records through a synchronous observer. The store
// module persists a session's records as a versioned JSON document.

// Modules
pub mod audio;
pub mod error;
pub mod physics;
pub mod store;
pub mod types;

// Re-export the main API
pub use audio::analyzer::{AnalyzerEvents, AnalyzerState, NoteAnalyzer};
pub use audio::capture::{input_device_names, MicrophoneCapture};
pub use audio::fft::{BIN_HZ, FFT_OUTPUT_LEN, SAMPLE_RATE_HZ, SPECTRUM_BINS};
pub use error::{CaptureError, ConfigError, StoreError};
pub use store::{load, save, TuningDocument, SCHEMA_VERSION};
pub use types::{
    NoteMeasurement, NoteTarget, PartialResult, PianoMetadata, PianoType, Quality,
    SpectrumSnapshot,
};

// Re-export commonly used physics helpers
pub use physics::{
    frequency_to_cents, frequency_to_midi, midi_to_frequency, midi_to_note_name,
    partial_frequency, typical_inharmonicity,
};

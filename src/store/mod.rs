// Measurement document store.
//
// Persists a session's per-note measurements with the piano metadata as a
// versioned JSON document (schema 1.1). Field names are camelCase, partial
// lists keep their order, timestamps are ISO-8601. Loading a saved document
// yields a semantically equal value: serde_json round-trips f64 exactly and
// chrono round-trips timestamps exactly.
//
// Note: the pianoType field inherits the host selector's coarsening, where
// the "Studio" dropdown entry maps to Console (see PianoType).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{NoteMeasurement, PianoMetadata};

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "1.1";

/// A complete tuning session document: piano metadata plus one measurement
/// per measured MIDI index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningDocument {
    pub schema_version: String,
    pub piano: PianoMetadata,
    /// Measurements keyed by MIDI index (serialized as string keys).
    pub measurements: BTreeMap<u8, NoteMeasurement>,
}

impl TuningDocument {
    pub fn new(piano: PianoMetadata) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            piano,
            measurements: BTreeMap::new(),
        }
    }

    /// Insert or replace the measurement for its MIDI index.
    pub fn insert(&mut self, measurement: NoteMeasurement) {
        self.measurements.insert(measurement.midi_index, measurement);
    }

    pub fn get(&self, midi: u8) -> Option<&NoteMeasurement> {
        self.measurements.get(&midi)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

/// Write a document as pretty-printed JSON.
pub fn save(path: &Path, document: &TuningDocument) -> Result<(), StoreError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), document).map_err(StoreError::Corrupt)?;
    log::info!("saved {} measurements to {}", document.len(), path.display());
    Ok(())
}

/// Read a document back, verifying the schema version.
pub fn load(path: &Path) -> Result<TuningDocument, StoreError> {
    let file = File::open(path)?;
    let document: TuningDocument =
        serde_json::from_reader(BufReader::new(file)).map_err(StoreError::Corrupt)?;
    if document.schema_version != SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch { found: document.schema_version });
    }
    log::info!("loaded {} measurements from {}", document.len(), path.display());
    Ok(document)
}

// The measurement engine: attack-triggered capture state machine around the
// spectral pipeline.
//
// Lifecycle per note: the host sets a target (Armed), a hammer strike raises
// block RMS past the attack gate (Measuring), every completed FFT yields at
// most one candidate measurement, and three consecutive Green frames lock the
// note and emit the best measurement collected so far (Locked). Retargeting
// unlocks; reset() returns to Idle from anywhere.
//
// Events are delivered synchronously from the analysis thread through a
// statically dispatched observer; handlers receive values by copy and must
// not block.

use std::collections::VecDeque;

use chrono::Utc;

use super::fft::{SpectralPipeline, BIN_HZ};
use super::frames::FrameAverager;
use super::peaks::{DetectedPartial, PartialSearch};
use super::solver::{self, SolvedNote};
use super::window::window_length_for_midi;
use crate::error::ConfigError;
use crate::physics::{self, ScaleBreakZone};
use crate::types::{
    NoteMeasurement, NoteTarget, PartialResult, PianoMetadata, Quality, SpectrumSnapshot,
};

/// Block-to-block RMS rise that signals a hammer strike.
const ATTACK_DELTA_DB: f64 = 15.0;

/// Absolute RMS floor for an attack; quiet transients stay ignored.
const ATTACK_ABS_DB: f64 = -45.0;

/// RMS assigned before any block arrives, so the first loud block triggers.
const SILENCE_DB: f64 = -200.0;

/// Candidate measurements retained for best-of selection.
const ROLLING_CAPACITY: usize = 10;

/// Consecutive Green frames required to lock.
const LOCK_GREEN_STREAK: usize = 3;

/// Accepted B values retained for search-window smoothing.
const B_HISTORY_LEN: usize = 5;

/// Capture lifecycle of the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    /// No target note; incoming samples are ignored.
    Idle,
    /// Target set, waiting for an attack.
    Armed,
    /// Attack seen; every completed FFT yields a candidate measurement.
    Measuring,
    /// Best measurement committed; samples accepted but not analyzed.
    Locked,
}

/// Observer surface for the three analyzer event channels. All methods have
/// no-op defaults so hosts implement only what they consume.
pub trait AnalyzerEvents {
    /// Fired after each accepted frame while Measuring, carrying the current
    /// best measurement.
    fn measurement_updated(&mut self, measurement: &NoteMeasurement) {
        let _ = measurement;
    }

    /// Fired once per FFT while Armed or Measuring.
    fn raw_spectrum_updated(&mut self, snapshot: &SpectrumSnapshot) {
        let _ = snapshot;
    }

    /// Fired once on the Measuring -> Locked transition.
    fn measurement_auto_stopped(&mut self, measurement: &NoteMeasurement) {
        let _ = measurement;
    }
}

/// Observer for hosts that poll instead of subscribing.
impl AnalyzerEvents for () {}

pub struct NoteAnalyzer<E: AnalyzerEvents> {
    events: E,
    state: AnalyzerState,
    target: Option<NoteTarget>,
    metadata: Option<PianoMetadata>,
    pipeline: SpectralPipeline,
    averager: FrameAverager,
    /// Accepted B values; their mean scales the next frame's search windows.
    b_history: VecDeque<f64>,
    /// Smoothed-B seed while the history is empty: the register prior.
    b_default: f64,
    rolling: VecDeque<NoteMeasurement>,
    green_streak: usize,
    prev_block_rms_db: f64,
}

impl<E: AnalyzerEvents> NoteAnalyzer<E> {
    pub fn new(events: E) -> Self {
        Self {
            events,
            state: AnalyzerState::Idle,
            target: None,
            metadata: None,
            pipeline: SpectralPipeline::new(),
            averager: FrameAverager::new(super::fft::SPECTRUM_BINS),
            b_history: VecDeque::with_capacity(B_HISTORY_LEN),
            b_default: 3e-4,
            rolling: VecDeque::with_capacity(ROLLING_CAPACITY),
            green_streak: 0,
            prev_block_rms_db: SILENCE_DB,
        }
    }

    /// Describe the piano being measured. Validated; drives scale-break
    /// handling. May be set in any state.
    pub fn set_piano_metadata(&mut self, metadata: PianoMetadata) -> Result<(), ConfigError> {
        metadata.validate()?;
        log::info!(
            "piano metadata: {:?}, {:.0} cm, scale break at MIDI {}",
            metadata.piano_type,
            metadata.length_cm,
            metadata.scale_break_midi
        );
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Select the note to measure. Clears all capture state, re-arms the
    /// attack gate, and resets the smoothed B to the register prior.
    /// Unlocks a Locked analyzer.
    pub fn set_target_note(&mut self, midi: u8, frequency_hz: f64) -> Result<(), ConfigError> {
        let target = NoteTarget::new(midi, frequency_hz)?;
        log::info!(
            "target note: MIDI {} ({}) at {:.2} Hz",
            midi,
            physics::midi_to_note_name(midi),
            frequency_hz
        );
        self.target = Some(target);
        self.state = AnalyzerState::Armed;
        self.pipeline.set_window_length(window_length_for_midi(midi));
        self.averager.clear();
        self.rolling.clear();
        self.b_history.clear();
        self.b_default = physics::typical_inharmonicity(midi);
        self.green_streak = 0;
        self.prev_block_rms_db = SILENCE_DB;
        Ok(())
    }

    /// Feed a block of mono samples in [-1.0, 1.0] at 96 kHz. Block size is
    /// arbitrary; the analyzer buffers internally.
    pub fn process_audio_buffer(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        match self.state {
            AnalyzerState::Idle | AnalyzerState::Locked => return,
            AnalyzerState::Armed | AnalyzerState::Measuring => {}
        }

        let rms_db = block_rms_db(samples);
        if self.state == AnalyzerState::Armed
            && rms_db - self.prev_block_rms_db > ATTACK_DELTA_DB
            && rms_db > ATTACK_ABS_DB
        {
            log::info!("attack detected at {:.1} dB RMS", rms_db);
            self.state = AnalyzerState::Measuring;
            self.rolling.clear();
            self.green_streak = 0;
            // Analysis windows start at the note onset; pre-attack audio
            // would smear the first frames' peaks.
            self.pipeline.clear();
            self.averager.clear();
        }
        self.prev_block_rms_db = rms_db;

        self.pipeline.push_samples(samples);
        while self.pipeline.frame_ready() {
            self.pipeline.compute_frame();
            self.averager.push(self.pipeline.magnitudes());
            self.emit_spectrum();
            if self.state == AnalyzerState::Measuring {
                self.analyze_frame();
            }
            if self.state == AnalyzerState::Locked {
                break;
            }
        }
    }

    /// Universal cancellation: clear everything and return to Idle.
    pub fn reset(&mut self) {
        self.state = AnalyzerState::Idle;
        self.target = None;
        self.pipeline.clear();
        self.averager.clear();
        self.rolling.clear();
        self.b_history.clear();
        self.green_streak = 0;
        self.prev_block_rms_db = SILENCE_DB;
    }

    pub fn is_measurement_locked(&self) -> bool {
        self.state == AnalyzerState::Locked
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn target(&self) -> Option<&NoteTarget> {
        self.target.as_ref()
    }

    /// The best measurement collected for the current target, ranked by
    /// quality, then partial count, then first-partial amplitude.
    pub fn best_measurement(&self) -> Option<&NoteMeasurement> {
        self.rolling.iter().max_by(|a, b| {
            let quality = a.quality.score().cmp(&b.quality.score());
            let count = a.detected_partials.len().cmp(&b.detected_partials.len());
            let amp = first_partial_amplitude(a)
                .partial_cmp(&first_partial_amplitude(b))
                .expect("amplitudes are finite");
            quality.then(count).then(amp)
        })
    }

    /// Mean of the accepted-B history, or the register prior before any
    /// measurement lands.
    pub fn smoothed_b(&self) -> f64 {
        if self.b_history.is_empty() {
            self.b_default
        } else {
            self.b_history.iter().sum::<f64>() / self.b_history.len() as f64
        }
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    fn emit_spectrum(&mut self) {
        let Some(target) = self.target else {
            return;
        };
        let snapshot = SpectrumSnapshot {
            magnitudes: self.pipeline.magnitudes().iter().map(|&m| m as f32).collect(),
            bin_hz: BIN_HZ,
            target_frequency: target.frequency,
            target_midi: target.midi,
            note_name: physics::midi_to_note_name(target.midi),
            captured_at: Utc::now(),
        };
        self.events.raw_spectrum_updated(&snapshot);
    }

    /// Run partial detection and the f0/B solver on the averaged spectrum,
    /// producing at most one candidate measurement.
    fn analyze_frame(&mut self) {
        let Some(target) = self.target else {
            return;
        };
        let scale_break = self.metadata.map(|m| m.scale_break_midi);
        let zone = physics::classify_scale_break(target.midi, scale_break);
        let smoothed_b = self.smoothed_b();
        let padding = self.pipeline.padding_factor();

        let (partials, solved) = {
            let Some(view) = self.averager.view() else {
                return;
            };
            let search = PartialSearch::new(view, target.midi, zone, smoothed_b, padding);
            let pass1 = search.harmonic_pass(target.frequency);
            if pass1.is_empty() {
                return;
            }
            let Some(first) = solver::solve(&pass1, target.frequency, target.midi, scale_break)
            else {
                return;
            };
            // Second pass on the B-corrected grid recovers partials the
            // naive grid missed; keep pass 1 if it somehow finds nothing.
            let pass2 = search.inharmonic_pass(first.f0, first.b);
            let partials = if pass2.is_empty() { pass1 } else { pass2 };
            let Some(solved) = solver::solve(&partials, target.frequency, target.midi, scale_break)
            else {
                return;
            };
            (partials, solved)
        };

        if !target.accepts(solved.f0) {
            log::debug!(
                "discarding frame: f0 {:.2} Hz outside +/-50 cents of {:.2} Hz",
                solved.f0,
                target.frequency
            );
            return;
        }

        let quality = classify_quality(partials.len(), zone);
        self.push_accepted_b(solved.b);
        let measurement = build_measurement(&target, &partials, &solved, quality);
        log::debug!(
            "frame: f0 {:.3} Hz, B {:.2e}, {} partials, {:?}",
            solved.f0,
            solved.b,
            partials.len(),
            quality
        );

        if self.rolling.len() == ROLLING_CAPACITY {
            self.rolling.pop_front();
        }
        self.rolling.push_back(measurement);

        let best = self.best_measurement().cloned().expect("rolling buffer is non-empty");
        self.events.measurement_updated(&best);

        if quality == Quality::Green {
            self.green_streak += 1;
        } else {
            self.green_streak = 0;
        }
        if self.green_streak >= LOCK_GREEN_STREAK {
            log::info!(
                "auto-stop: MIDI {} locked at f0 {:.3} Hz",
                best.midi_index,
                best.calculated_fundamental
            );
            self.state = AnalyzerState::Locked;
            self.events.measurement_auto_stopped(&best);
        }
    }

    fn push_accepted_b(&mut self, b: f64) {
        if self.b_history.len() == B_HISTORY_LEN {
            self.b_history.pop_front();
        }
        self.b_history.push_back(b);
    }
}

/// Block RMS in dB, floored to avoid log(0) on digital silence.
fn block_rms_db(samples: &[f32]) -> f64 {
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    20.0 * rms.max(1e-10).log10()
}

/// Frame quality from the detected partial count. The transition zone asks
/// for more partials because its spectra are messier.
fn classify_quality(partial_count: usize, zone: ScaleBreakZone) -> Quality {
    if zone == ScaleBreakZone::Transition {
        if partial_count > 7 {
            Quality::Green
        } else if partial_count > 4 {
            Quality::Orange
        } else {
            Quality::Red
        }
    } else if partial_count > 5 {
        Quality::Green
    } else if partial_count > 2 {
        Quality::Orange
    } else {
        Quality::Red
    }
}

fn build_measurement(
    target: &NoteTarget,
    partials: &[DetectedPartial],
    solved: &SolvedNote,
    quality: Quality,
) -> NoteMeasurement {
    NoteMeasurement {
        midi_index: target.midi,
        note_name: physics::midi_to_note_name(target.midi),
        target_frequency: target.frequency,
        calculated_fundamental: solved.f0,
        inharmonicity_coefficient: solved.b,
        measured_partial_number: solved.anchor_n,
        quality,
        detected_partials: partials
            .iter()
            .map(|p| PartialResult { n: p.n, frequency: p.frequency, amplitude: p.amplitude_db })
            .collect(),
        measured_at: Utc::now(),
    }
}

fn first_partial_amplitude(m: &NoteMeasurement) -> f64 {
    m.detected_partials.first().map_or(f64::NEG_INFINITY, |p| p.amplitude)
}

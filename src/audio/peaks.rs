// Two-pass partial detection with sub-bin refinement.
//
// For each expected partial number the finder searches a register-scaled
// window of bins around a grid frequency: pass 1 uses the naive harmonic grid
// n * f_target, pass 2 re-searches on the inharmonic grid n * f0 *
// sqrt(1 + B n^2) once a (f0, B) estimate exists, with tighter windows.
// Candidates must clear the adaptive SNR threshold and a prominence check,
// then are refined by log-domain parabolic interpolation with bin-center
// fallback on degenerate fits.

use super::fft::{BIN_HZ, NYQUIST_HZ, SPECTRUM_BINS};
use super::noise;
use crate::physics::{self, ScaleBreakZone};

/// Interpolation guard: neighbors below this linear magnitude make the
/// log-parabola unreliable.
const INTERP_MAG_FLOOR: f64 = 1e-6;

/// Interpolation guard: a flatter parabola than this has no usable vertex.
const INTERP_DENOM_FLOOR: f64 = 1e-10;

/// Searches stop this far below Nyquist; the top of the spectrum is all
/// anti-aliasing slope.
const NYQUIST_MARGIN_HZ: f64 = 1000.0;

/// Peak must exceed its neighborhood by this factor to count as a partial.
const PROMINENCE_RATIO: f64 = 1.15;

/// One accepted partial candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedPartial {
    pub n: u32,
    /// Refined frequency in Hz.
    pub frequency: f64,
    /// Peak amplitude in dB (20 * log10 of linear magnitude).
    pub amplitude_db: f64,
    /// Peak linear magnitude, kept for strongest-partial selection.
    pub magnitude: f64,
}

/// Search parameters shared by both passes over one spectrum frame.
pub struct PartialSearch<'a> {
    magnitudes: &'a [f64],
    midi: u8,
    zone: ScaleBreakZone,
    smoothed_b: f64,
    /// Output bins per analysis-window bin (1 bass, 2 mid, 4 treble); the
    /// prominence comparison distance scales with it.
    padding_factor: usize,
}

impl<'a> PartialSearch<'a> {
    pub fn new(
        magnitudes: &'a [f64],
        midi: u8,
        zone: ScaleBreakZone,
        smoothed_b: f64,
        padding_factor: usize,
    ) -> Self {
        Self { magnitudes, midi, zone, smoothed_b, padding_factor }
    }

    /// Pass 1: search the naive harmonic grid n * f_target.
    pub fn harmonic_pass(&self, f_target: f64) -> Vec<DetectedPartial> {
        self.run(|n| f64::from(n) * f_target, false)
    }

    /// Pass 2: search the inharmonic grid with the current (f0, B) estimate.
    /// Windows shrink 30% because the grid is already corrected.
    pub fn inharmonic_pass(&self, f0: f64, b: f64) -> Vec<DetectedPartial> {
        self.run(|n| physics::partial_frequency(n, f0, b), true)
    }

    fn run(&self, grid: impl Fn(u32) -> f64, refine: bool) -> Vec<DetectedPartial> {
        let mut partials = Vec::new();
        for n in 1..=physics::max_partial_count(self.midi) {
            let f_search = grid(n);
            if f_search > NYQUIST_HZ - NYQUIST_MARGIN_HZ {
                break;
            }
            if let Some(partial) = self.find_partial(n, f_search, refine) {
                partials.push(partial);
            }
        }
        partials
    }

    /// Half-width of the search window in cents for partial n.
    fn search_window_cents(&self, n: u32, refine: bool) -> f64 {
        let mut cents = physics::base_search_cents(self.midi);
        // Peaks widen near the wound/plain transition
        if self.zone.is_near_break() {
            cents *= 1.4;
        }
        // Cumulative inharmonicity uncertainty grows with partial number
        cents *= 1.0 + 0.10 * f64::from(n - 1);
        // Stiffer strings wander further from the grid
        cents *= (self.smoothed_b / 2e-4).sqrt().clamp(0.7, 2.0);
        if refine {
            cents *= 0.7;
        }
        cents.min(100.0)
    }

    /// Window half-width in bins, with absolute minima for low frequencies
    /// where a cents window collapses below the bin resolution.
    fn search_window_bins(&self, f_search: f64, cents: f64) -> usize {
        let mut half_hz = f_search * ((cents / 1200.0).exp2() - 1.0);
        let min_hz = if f_search < 50.0 {
            2.0
        } else if f_search < 100.0 {
            3.0
        } else if f_search < 200.0 {
            4.0
        } else {
            0.0
        };
        half_hz = half_hz.max(min_hz);
        ((half_hz / BIN_HZ).ceil() as usize).max(3)
    }

    fn find_partial(&self, n: u32, f_search: f64, refine: bool) -> Option<DetectedPartial> {
        let cents = self.search_window_cents(n, refine);
        let half_bins = self.search_window_bins(f_search, cents);
        let center = (f_search / BIN_HZ).round() as usize;
        let lo = center.saturating_sub(half_bins).max(1);
        let hi = (center + half_bins).min(SPECTRUM_BINS - 2);
        if lo > hi {
            return None;
        }

        let (peak_bin, peak_mag) = self.magnitudes[lo..=hi]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).expect("magnitudes are finite"))
            .map(|(i, &m)| (lo + i, m))?;

        let threshold = noise::adaptive_threshold(
            self.magnitudes,
            center,
            half_bins,
            f_search,
            n,
            self.zone.is_near_break(),
        );
        if peak_mag < threshold {
            return None;
        }
        if !self.is_prominent(peak_bin, peak_mag) {
            return None;
        }

        let frequency = self.refine_frequency(peak_bin);

        // The refined frequency must stay inside the window it was found in
        let half_hz = half_bins as f64 * BIN_HZ;
        if (frequency - f_search).abs() > 1.5 * half_hz {
            return None;
        }
        let cents_limit = if n <= 4 {
            50.0
        } else if self.zone.is_near_break() {
            120.0
        } else {
            80.0
        };
        if physics::frequency_to_cents(frequency, f_search).abs() > cents_limit {
            return None;
        }

        Some(DetectedPartial {
            n,
            frequency,
            amplitude_db: 20.0 * peak_mag.log10(),
            magnitude: peak_mag,
        })
    }

    /// The peak must stand `PROMINENCE_RATIO` above the mean of the bins one
    /// analysis-window bin to each side. A genuine windowed peak always does;
    /// a flat noise plateau never does. The comparison distance is the
    /// padding factor because zero-padding subdivides window bins.
    fn is_prominent(&self, peak_bin: usize, peak_mag: f64) -> bool {
        let d = self.padding_factor.max(1);
        let left = self.magnitudes[peak_bin.saturating_sub(d)];
        let right = self.magnitudes[(peak_bin + d).min(self.magnitudes.len() - 1)];
        peak_mag >= PROMINENCE_RATIO * (left + right) / 2.0
    }

    /// Log-domain parabolic interpolation around the peak bin, falling back
    /// to the bin center when the fit is degenerate.
    fn refine_frequency(&self, peak_bin: usize) -> f64 {
        let bin_center = peak_bin as f64 * BIN_HZ;
        if peak_bin == 0 || peak_bin + 1 >= self.magnitudes.len() {
            return bin_center;
        }
        let left = self.magnitudes[peak_bin - 1];
        let right = self.magnitudes[peak_bin + 1];
        if left < INTERP_MAG_FLOOR || right < INTERP_MAG_FLOOR {
            return bin_center;
        }
        let y1 = left.max(INTERP_MAG_FLOOR).ln();
        let y2 = self.magnitudes[peak_bin].max(INTERP_MAG_FLOOR).ln();
        let y3 = right.max(INTERP_MAG_FLOOR).ln();
        let denom = y1 - 2.0 * y2 + y3;
        if denom.abs() < INTERP_DENOM_FLOOR {
            return bin_center;
        }
        let d = (y1 - y3) / (2.0 * denom);
        if d.abs() > 1.0 {
            return bin_center;
        }
        (peak_bin as f64 + d) * BIN_HZ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fft::{SpectralPipeline, SAMPLE_RATE_HZ};
    use crate::audio::window::WINDOW_BASS;

    /// Sum of inharmonic partials at the given (f0, B), linear amplitudes.
    fn partial_stack(f0: f64, b: f64, amps: &[f64], len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / SAMPLE_RATE_HZ as f64;
                let mut s = 0.0;
                for (idx, &amp) in amps.iter().enumerate() {
                    let f = physics::partial_frequency(idx as u32 + 1, f0, b);
                    s += amp * (2.0 * std::f64::consts::PI * f * t).sin();
                }
                s as f32
            })
            .collect()
    }

    fn spectrum_of(samples: &[f32]) -> SpectralPipeline {
        let mut pipeline = SpectralPipeline::new();
        pipeline.push_samples(samples);
        assert!(pipeline.frame_ready());
        pipeline.compute_frame();
        pipeline
    }

    #[test]
    fn test_pure_sinusoid_single_partial() {
        // A pure 440 Hz tone yields exactly one partial, n = 1, within
        // 0.05 Hz of the true frequency.
        let samples = partial_stack(440.0, 0.0, &[1.0], WINDOW_BASS);
        let pipeline = spectrum_of(&samples);
        let search = PartialSearch::new(
            pipeline.magnitudes(),
            69,
            ScaleBreakZone::Away,
            physics::typical_inharmonicity(69),
            pipeline.padding_factor(),
        );
        let partials = search.harmonic_pass(440.0);
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].n, 1);
        assert!(
            (partials[0].frequency - 440.0).abs() < 0.05,
            "refined frequency {}",
            partials[0].frequency
        );
        assert!(partials[0].amplitude_db > -1.0);
    }

    #[test]
    fn test_sub_bin_accuracy_across_offsets() {
        // Frequencies at awkward sub-bin offsets still refine to within
        // 0.05 Hz for the bass window.
        for &f in &[82.4, 440.0, 441.3, 1000.0, 2637.0] {
            let samples = partial_stack(f, 0.0, &[0.8], WINDOW_BASS);
            let pipeline = spectrum_of(&samples);
            let midi = crate::physics::frequency_to_midi(f).round() as u8;
            let search = PartialSearch::new(
                pipeline.magnitudes(),
                midi,
                ScaleBreakZone::Away,
                physics::typical_inharmonicity(midi),
                pipeline.padding_factor(),
            );
            let partials = search.harmonic_pass(f);
            assert!(!partials.is_empty(), "no partial at {} Hz", f);
            assert!(
                (partials[0].frequency - f).abs() < 0.05,
                "{} Hz refined to {}",
                f,
                partials[0].frequency
            );
        }
    }

    #[test]
    fn test_inharmonic_stack_detection() {
        // C3 with B = 3e-4 and amplitudes falling 3 dB per partial
        let f0 = 130.81;
        let b = 3e-4;
        let amps: Vec<f64> = (0..10).map(|i| 10f64.powf(-3.0 * i as f64 / 20.0)).collect();
        let samples = partial_stack(f0, b, &amps, WINDOW_BASS);
        let pipeline = spectrum_of(&samples);
        let search = PartialSearch::new(
            pipeline.magnitudes(),
            48,
            ScaleBreakZone::Away,
            physics::typical_inharmonicity(48),
            pipeline.padding_factor(),
        );
        let partials = search.harmonic_pass(f0);
        assert!(partials.len() >= 6, "only {} partials found", partials.len());
        // Strictly increasing n
        for pair in partials.windows(2) {
            assert!(pair[1].n > pair[0].n);
        }
        // Each detected partial sits near its inharmonic position
        for p in &partials {
            let expected = physics::partial_frequency(p.n, f0, b);
            assert!(
                (p.frequency - expected).abs() < 0.5,
                "partial {} at {} expected {}",
                p.n,
                p.frequency,
                expected
            );
        }
    }

    #[test]
    fn test_inharmonic_pass_tracks_corrected_grid() {
        let f0 = 130.81;
        let b = 3e-4;
        let amps: Vec<f64> = (0..10).map(|i| 10f64.powf(-3.0 * i as f64 / 20.0)).collect();
        let samples = partial_stack(f0, b, &amps, WINDOW_BASS);
        let pipeline = spectrum_of(&samples);
        let search = PartialSearch::new(
            pipeline.magnitudes(),
            48,
            ScaleBreakZone::Away,
            physics::typical_inharmonicity(48),
            pipeline.padding_factor(),
        );
        let refined = search.inharmonic_pass(f0, b);
        assert!(refined.len() >= 8, "only {} partials in pass 2", refined.len());
    }

    #[test]
    fn test_silence_detects_nothing() {
        let samples = vec![0.0f32; WINDOW_BASS];
        let pipeline = spectrum_of(&samples);
        let search = PartialSearch::new(
            pipeline.magnitudes(),
            69,
            ScaleBreakZone::Away,
            physics::typical_inharmonicity(69),
            pipeline.padding_factor(),
        );
        assert!(search.harmonic_pass(440.0).is_empty());
    }

    #[test]
    fn test_flat_plateau_fails_prominence() {
        // A flat shelf of bins has no prominent peak even when loud enough
        let mut mags = vec![0.0f64; SPECTRUM_BINS];
        let center = (440.0 / BIN_HZ).round() as usize;
        for k in center - 6..=center + 6 {
            mags[k] = 0.05;
        }
        let search =
            PartialSearch::new(&mags, 69, ScaleBreakZone::Away, 1.5e-4, 1);
        assert!(search.harmonic_pass(440.0).is_empty());
    }

    #[test]
    fn test_off_grid_peak_rejected_by_cents_gate() {
        // A strong tone 70 cents away from the expected fundamental must not
        // be claimed as partial n = 1 (gate is 50 cents for n <= 4).
        let f_off = 440.0 * (70.0 / 1200.0f64).exp2();
        let samples = partial_stack(f_off, 0.0, &[1.0], WINDOW_BASS);
        let pipeline = spectrum_of(&samples);
        let search = PartialSearch::new(
            pipeline.magnitudes(),
            69,
            ScaleBreakZone::Away,
            physics::typical_inharmonicity(69),
            pipeline.padding_factor(),
        );
        let partials = search.harmonic_pass(440.0);
        assert!(partials.iter().all(|p| p.n != 1), "off-grid tone claimed as n=1");
    }
}

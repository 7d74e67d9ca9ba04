// Blackman-Harris analysis windows.
//
// The 4-term Blackman-Harris window trades mainlobe width for -92 dB
// sidelobes, which keeps neighboring partials from leaking into each other's
// search windows. Three sizes are precomputed at construction: treble notes
// decay in under 100 ms, so shorter windows capture more of the sustain.

/// Window length for bass notes (MIDI <= 71).
pub const WINDOW_BASS: usize = 32_768;
/// Window length for mid-register notes (MIDI 72..=78).
pub const WINDOW_MID: usize = 16_384;
/// Window length for treble notes (MIDI >= 79).
pub const WINDOW_TREBLE: usize = 8_192;

/// 4-term Blackman-Harris coefficients.
const A0: f64 = 0.35875;
const A1: f64 = 0.48829;
const A2: f64 = 0.14128;
const A3: f64 = 0.01168;

/// Analysis window length for a target note's register.
pub fn window_length_for_midi(midi: u8) -> usize {
    match midi {
        0..=71 => WINDOW_BASS,
        72..=78 => WINDOW_MID,
        _ => WINDOW_TREBLE,
    }
}

/// Generate 4-term Blackman-Harris coefficients for a window of `len` samples.
pub fn blackman_harris(len: usize) -> Vec<f64> {
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| {
            let x = 2.0 * std::f64::consts::PI * i as f64 / denom;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()
        })
        .collect()
}

/// The three analysis windows, precomputed once and reused for every frame.
pub struct AnalysisWindows {
    bass: Vec<f64>,
    mid: Vec<f64>,
    treble: Vec<f64>,
    bass_sum: f64,
    mid_sum: f64,
    treble_sum: f64,
}

impl AnalysisWindows {
    pub fn new() -> Self {
        let bass = blackman_harris(WINDOW_BASS);
        let mid = blackman_harris(WINDOW_MID);
        let treble = blackman_harris(WINDOW_TREBLE);
        let bass_sum = bass.iter().sum();
        let mid_sum = mid.iter().sum();
        let treble_sum = treble.iter().sum();
        Self { bass, mid, treble, bass_sum, mid_sum, treble_sum }
    }

    /// Window coefficients for one of the three analysis lengths.
    pub fn coefficients(&self, len: usize) -> &[f64] {
        match len {
            WINDOW_BASS => &self.bass,
            WINDOW_MID => &self.mid,
            WINDOW_TREBLE => &self.treble,
            other => panic!("no analysis window of length {}", other),
        }
    }

    /// Sum of the window coefficients, used for amplitude normalization
    /// (a full-scale sinusoid then reads 1.0 linear magnitude).
    pub fn coherent_sum(&self, len: usize) -> f64 {
        match len {
            WINDOW_BASS => self.bass_sum,
            WINDOW_MID => self.mid_sum,
            WINDOW_TREBLE => self.treble_sum,
            other => panic!("no analysis window of length {}", other),
        }
    }
}

impl Default for AnalysisWindows {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_length_per_register() {
        assert_eq!(window_length_for_midi(21), WINDOW_BASS);
        assert_eq!(window_length_for_midi(71), WINDOW_BASS);
        assert_eq!(window_length_for_midi(72), WINDOW_MID);
        assert_eq!(window_length_for_midi(78), WINDOW_MID);
        assert_eq!(window_length_for_midi(79), WINDOW_TREBLE);
        assert_eq!(window_length_for_midi(108), WINDOW_TREBLE);
    }

    #[test]
    fn test_blackman_harris_shape() {
        let w = blackman_harris(WINDOW_TREBLE);
        assert_eq!(w.len(), WINDOW_TREBLE);
        // Endpoints are a0 - a1 + a2 - a3, essentially zero
        assert!(w[0].abs() < 1e-4);
        assert!(w[WINDOW_TREBLE - 1].abs() < 1e-4);
        // Peak of 1.0 at the center
        let mid = w[WINDOW_TREBLE / 2];
        assert!((mid - 1.0).abs() < 1e-6, "center coefficient {}", mid);
        // Symmetric
        for i in 0..WINDOW_TREBLE / 2 {
            assert!((w[i] - w[WINDOW_TREBLE - 1 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_coherent_sum_matches_mean() {
        let windows = AnalysisWindows::new();
        // Mean coefficient of any cosine-sum window converges to a0
        for &len in &[WINDOW_BASS, WINDOW_MID, WINDOW_TREBLE] {
            let mean = windows.coherent_sum(len) / len as f64;
            assert!((mean - A0).abs() < 1e-3, "mean {} for len {}", mean, len);
        }
    }
}

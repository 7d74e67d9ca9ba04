// Adaptive FFT pipeline: sliding capture buffer -> windowed, zero-padded
// forward FFT -> single-sided normalized magnitudes.
//
// The analysis window length follows the target register (32768 / 16384 /
// 8192 samples) but every frame is zero-padded to a constant 32768-point
// transform, so downstream consumers always see 16384 bins at 2.9296875
// Hz/bin regardless of register. After each frame the first half-window is
// shifted out, giving 50% overlap.
//
// All buffers and the FFT plan are allocated once at construction; the
// per-frame path performs no allocation.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use super::window::{AnalysisWindows, WINDOW_BASS};

/// The only sample rate the engine analyzes.
pub const SAMPLE_RATE_HZ: u32 = 96_000;

/// Zero-padded transform length, constant across registers.
pub const FFT_OUTPUT_LEN: usize = 32_768;

/// Number of usable magnitude bins (positive frequencies).
pub const SPECTRUM_BINS: usize = FFT_OUTPUT_LEN / 2;

/// Frequency resolution of the padded transform: 2.9296875 Hz per bin.
pub const BIN_HZ: f64 = SAMPLE_RATE_HZ as f64 / FFT_OUTPUT_LEN as f64;

/// Nyquist frequency at the engine sample rate.
pub const NYQUIST_HZ: f64 = SAMPLE_RATE_HZ as f64 / 2.0;

pub struct SpectralPipeline {
    fft: Arc<dyn Fft<f64>>,
    windows: AnalysisWindows,
    /// Incoming mono samples awaiting analysis; holds at most one window
    /// plus the remainder of the last pushed block.
    capture: Vec<f64>,
    /// Current analysis window length, set from the target register.
    window_len: usize,
    /// FFT working buffer, length FFT_OUTPUT_LEN.
    transform: Vec<Complex<f64>>,
    /// rustfft scratch space for the in-place transform.
    scratch: Vec<Complex<f64>>,
    /// Normalized magnitudes of the latest frame, length SPECTRUM_BINS.
    magnitudes: Vec<f64>,
}

impl SpectralPipeline {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_OUTPUT_LEN);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            fft,
            windows: AnalysisWindows::new(),
            capture: Vec::with_capacity(FFT_OUTPUT_LEN * 2),
            window_len: WINDOW_BASS,
            transform: vec![Complex::new(0.0, 0.0); FFT_OUTPUT_LEN],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; SPECTRUM_BINS],
        }
    }

    /// Select the analysis window length and discard buffered samples.
    /// Called on retarget; the next frame starts from a clean capture.
    pub fn set_window_length(&mut self, len: usize) {
        self.window_len = len;
        self.capture.clear();
    }

    pub fn window_length(&self) -> usize {
        self.window_len
    }

    /// Drop all buffered samples without changing the window length.
    pub fn clear(&mut self) {
        self.capture.clear();
    }

    /// Append a block of mono samples to the capture buffer.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.capture.extend(samples.iter().map(|&s| f64::from(s)));
    }

    /// True when enough samples are buffered to compute the next frame.
    pub fn frame_ready(&self) -> bool {
        self.capture.len() >= self.window_len
    }

    /// Window, zero-pad and transform the oldest full window of samples,
    /// then shift out the first half-window (50% overlap).
    ///
    /// Magnitudes are normalized by 2 / sum(window), the single-sided
    /// amplitude convention: a full-scale sinusoid reads 1.0 (0 dB).
    pub fn compute_frame(&mut self) {
        debug_assert!(self.frame_ready());
        let w = self.windows.coefficients(self.window_len);
        for (i, coeff) in w.iter().enumerate() {
            self.transform[i] = Complex::new(self.capture[i] * coeff, 0.0);
        }
        for slot in self.transform.iter_mut().skip(self.window_len) {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft.process_with_scratch(&mut self.transform, &mut self.scratch);

        let norm = 2.0 / self.windows.coherent_sum(self.window_len);
        for (mag, bin) in self.magnitudes.iter_mut().zip(self.transform.iter()) {
            *mag = bin.norm() * norm;
        }

        self.capture.drain(..self.window_len / 2);
    }

    /// Normalized magnitudes of the most recent frame.
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    /// Output bins per analysis-window bin: 1 for the bass window, 2 for
    /// mid, 4 for treble. The mainlobe of a peak spans this many more
    /// output bins under zero-padding.
    pub fn padding_factor(&self) -> usize {
        FFT_OUTPUT_LEN / self.window_len
    }
}

impl Default for SpectralPipeline {
    fn default() -> Self {
        Self::new()
    }
}

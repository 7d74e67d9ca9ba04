// Local noise-floor estimation for adaptive SNR thresholding.
//
// For each partial search the estimator samples spectrum magnitudes near the
// expected peak, excluding the peak's own neighborhood, and takes their
// median. Three strategies run in order until enough samples accumulate:
// around the signal, below the signal, and a low-frequency reference band.
// The peak acceptance threshold is then the larger of a register base value
// and 3x the estimated floor.

use super::fft::BIN_HZ;

/// Fewest magnitude samples considered a trustworthy estimate.
const MIN_SAMPLES: usize = 5;

/// Clamp range for the estimated floor, linear magnitude.
const FLOOR_MIN: f64 = 1e-6;
const FLOOR_MAX: f64 = 1e-2;

/// Returned when no strategy collects enough samples.
const FLOOR_FALLBACK: f64 = 1e-4;

/// Estimate the local noise floor around bin `center` for a search window of
/// `half_range` bins.
pub fn estimate_noise_floor(magnitudes: &[f64], center: usize, half_range: usize) -> f64 {
    let mut samples: Vec<f64> = Vec::with_capacity(32);
    let r = half_range.max(1);

    collect_around_signal(magnitudes, center, r, &mut samples);
    if samples.len() < MIN_SAMPLES {
        collect_below_signal(magnitudes, center, r, &mut samples);
    }
    if samples.len() < MIN_SAMPLES {
        collect_low_frequency_reference(magnitudes, center, &mut samples);
    }

    if samples.len() < MIN_SAMPLES {
        return FLOOR_FALLBACK;
    }

    median(&mut samples).clamp(FLOOR_MIN, FLOOR_MAX)
}

/// Sample [center - 4R, center + 4R] stepping about R/2, excluding the
/// 2.5R exclusion zone around the signal itself.
fn collect_around_signal(magnitudes: &[f64], center: usize, r: usize, out: &mut Vec<f64>) {
    let lo = center.saturating_sub(4 * r).max(1);
    let hi = (center + 4 * r).min(magnitudes.len().saturating_sub(1));
    let exclusion = 2.5 * r as f64;
    let step = (r / 2).max(1);
    let mut k = lo;
    while k <= hi {
        if (k as f64 - center as f64).abs() >= exclusion {
            out.push(magnitudes[k]);
        }
        k += step;
    }
}

/// Sample [1, center - 2.5R] with a finer step of about 2.5R/8.
fn collect_below_signal(magnitudes: &[f64], center: usize, r: usize, out: &mut Vec<f64>) {
    let exclusion = (2.5 * r as f64).ceil() as usize;
    let Some(hi) = center.checked_sub(exclusion) else {
        return;
    };
    let step = (exclusion / 8).max(1);
    let mut k = 1;
    while k <= hi.min(magnitudes.len().saturating_sub(1)) {
        out.push(magnitudes[k]);
        k += step;
    }
}

/// Sample the 100..500 Hz band with step 3, but only when the signal sits
/// well above that band.
fn collect_low_frequency_reference(magnitudes: &[f64], center: usize, out: &mut Vec<f64>) {
    let center_hz = center as f64 * BIN_HZ;
    if center_hz <= 1000.0 {
        return;
    }
    let lo = (100.0 / BIN_HZ) as usize;
    let hi = ((500.0 / BIN_HZ) as usize).min(magnitudes.len().saturating_sub(1));
    let mut k = lo;
    while k <= hi {
        out.push(magnitudes[k]);
        k += 3;
    }
}

fn median(samples: &mut [f64]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).expect("magnitudes are finite"));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}

/// Base acceptance threshold by frequency and partial number, linear
/// magnitude. Low-frequency bins and high partial numbers are more
/// permissive: bass fundamentals and upper partials are intrinsically weak.
pub fn base_peak_threshold(freq_hz: f64, n: u32) -> f64 {
    let base = if freq_hz < 200.0 {
        1.5e-4
    } else if freq_hz < 800.0 {
        2.5e-4
    } else if freq_hz < 2500.0 {
        4e-4
    } else {
        6e-4
    };
    if n > 8 {
        base * 0.5
    } else {
        base
    }
}

/// Adaptive acceptance threshold: max(base, 3x noise floor), raised 20%
/// near the scale break where wider peaks smear energy across bins.
pub fn adaptive_threshold(
    magnitudes: &[f64],
    center: usize,
    half_range: usize,
    freq_hz: f64,
    n: u32,
    near_break: bool,
) -> f64 {
    let floor = estimate_noise_floor(magnitudes, center, half_range);
    let threshold = base_peak_threshold(freq_hz, n).max(3.0 * floor);
    if near_break {
        threshold * 1.2
    } else {
        threshold
    }
}

// Inharmonicity coefficient estimation.
//
// Stiff-string partials follow f_n = n * f0 * sqrt(1 + B n^2). With x_n = n^2
// and y_n = (f_n / (n * f0))^2 - 1 the model is linear, y ~ B x, and B falls
// out of a weighted least-squares slope with weights 1/n^2 (low partials are
// measured more reliably). Outliers, noise-dominated frames and the
// wound/plain scale-break transition each get a defined fallback so the
// estimate always lands inside the register's physical range.

use super::peaks::DetectedPartial;
use crate::physics::{self, ScaleBreakZone};

/// Partials quieter than this contribute only noise to the regression.
const REGRESSION_MIN_DB: f64 = -50.0;

/// Relative deviations below this are measurement noise, not physics.
const OUTLIER_Y_MIN: f64 = -0.05;

/// One partial's coordinates in the linearized model.
#[derive(Debug, Clone, Copy)]
struct RegressionPoint {
    n: u32,
    x: f64,
    y: f64,
    w: f64,
}

impl RegressionPoint {
    fn new(partial: &DetectedPartial, f0: f64) -> Self {
        let n = f64::from(partial.n);
        let ratio = partial.frequency / (n * f0);
        Self {
            n: partial.n,
            x: n * n,
            y: ratio * ratio - 1.0,
            w: 1.0 / (n * n),
        }
    }
}

/// Estimate B from detected partials and the current fundamental estimate.
///
/// `scale_break_midi` comes from the piano metadata when set; inside the
/// transition zone the regression is restricted to low partials because the
/// upper partials mix wound and plain string behavior.
pub fn estimate_inharmonicity(
    partials: &[DetectedPartial],
    f0: f64,
    midi: u8,
    scale_break_midi: Option<u8>,
) -> f64 {
    let zone = physics::classify_scale_break(midi, scale_break_midi);
    let range = physics::inharmonicity_range(midi);

    if zone == ScaleBreakZone::Transition {
        return transition_estimate(partials, f0, midi, scale_break_midi, range);
    }

    let mut points: Vec<RegressionPoint> = partials
        .iter()
        .filter(|p| p.amplitude_db > REGRESSION_MIN_DB && (2..=12).contains(&p.n))
        .map(|p| RegressionPoint::new(p, f0))
        .collect();

    if points.len() < 3 {
        log::debug!(
            "inharmonicity: {} usable partials at MIDI {}, falling back to register prior",
            points.len(),
            midi
        );
        return range.typical;
    }

    let y_max = if midi >= 72 { 0.3 } else { 0.5 };
    points.retain(|p| p.y >= OUTLIER_Y_MIN && p.y <= y_max);
    if points.len() < 2 {
        return range.typical;
    }

    match weighted_slope(&points) {
        Some(b) if b >= 0.0 => b.clamp(range.min, range.max),
        Some(_) => slope_analysis(&points, range),
        None => range.typical,
    }
}

/// Weighted least-squares slope of y on x. Returns None on a degenerate
/// system (all partials at one x, or vanishing weight mass).
fn weighted_slope(points: &[RegressionPoint]) -> Option<f64> {
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;
    let mut sum_wxy = 0.0;
    let mut sum_wxx = 0.0;
    for p in points {
        sum_w += p.w;
        sum_wx += p.w * p.x;
        sum_wy += p.w * p.y;
        sum_wxy += p.w * p.x * p.y;
        sum_wxx += p.w * p.x * p.x;
    }
    let denominator = sum_w * sum_wxx - sum_wx * sum_wx;
    if denominator.abs() < 1e-12 {
        return None;
    }
    Some((sum_w * sum_wxy - sum_wx * sum_wy) / denominator)
}

/// Fallback when the regression slope comes out negative.
///
/// Mostly non-positive deviations mean the frame is noise-dominated; return
/// the register prior. Otherwise the median positive deviation still carries
/// the stiffness signal: B = y_median / n_median^2.
fn slope_analysis(points: &[RegressionPoint], range: physics::InharmonicityRange) -> f64 {
    let mut sorted: Vec<&RegressionPoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.n);

    let non_positive = sorted.iter().filter(|p| p.y <= 0.0).count();
    if non_positive * 2 >= sorted.len() {
        log::debug!("inharmonicity: deviations flat or negative, using register prior");
        return range.typical;
    }

    let mut positive: Vec<&RegressionPoint> = sorted.iter().filter(|p| p.y > 0.0).copied().collect();
    positive.sort_by(|a, b| a.y.partial_cmp(&b.y).expect("deviations are finite"));
    let median = positive[positive.len() / 2];
    let n = f64::from(median.n);
    (median.y / (n * n)).clamp(range.min, range.max)
}

/// Transition-zone estimate: only partials 2..=5 with a looser outlier band.
/// With fewer than 3 usable points, return a conservative side-dependent
/// value: the scale-break note itself is the first plain string.
fn transition_estimate(
    partials: &[DetectedPartial],
    f0: f64,
    midi: u8,
    scale_break_midi: Option<u8>,
    range: physics::InharmonicityRange,
) -> f64 {
    let points: Vec<RegressionPoint> = partials
        .iter()
        .filter(|p| p.amplitude_db > REGRESSION_MIN_DB && (2..=5).contains(&p.n))
        .map(|p| RegressionPoint::new(p, f0))
        .filter(|p| p.y >= -0.1 && p.y <= 0.8)
        .collect();

    if points.len() < 3 {
        let fallback = match scale_break_midi {
            Some(brk) if midi < brk => 6e-4,
            Some(_) => 2e-4,
            None => 3e-4,
        };
        log::debug!(
            "inharmonicity: transition zone at MIDI {} starved, conservative B {}",
            midi,
            fallback
        );
        return fallback;
    }

    match weighted_slope(&points) {
        Some(b) if b >= 0.0 => b.clamp(range.min, range.max),
        Some(_) => slope_analysis(&points, range),
        None => range.typical,
    }
}

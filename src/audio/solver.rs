// Iterative f0 / B refinement.
//
// The fundamental and the inharmonicity coefficient depend on each other:
// B is regressed against deviations from n * f0, and f0 is back-solved from
// an anchor partial through f0 = f_anchor / (n * sqrt(1 + B n^2)). A short
// fixed-point iteration settles both. The anchor follows the register: deep
// bass notes anchor on n = 6 because their fundamentals are nearly absent.

use super::inharmonicity;
use super::peaks::DetectedPartial;
use crate::physics;

/// Iteration cap; convergence is typically reached in 2-3 rounds.
const MAX_ITERATIONS: usize = 5;

/// Convergence threshold on |delta f0| in Hz.
const CONVERGENCE_HZ: f64 = 0.01;

/// Partials quieter than this cannot seed the fundamental.
const SEED_MIN_DB: f64 = -40.0;

/// An anchor partial weaker than this is unreliable for back-solving f0.
const ANCHOR_MIN_DB: f64 = -60.0;

/// Converged fundamental estimate with the anchor that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedNote {
    pub f0: f64,
    pub b: f64,
    /// Partial number actually used to extract f0.
    pub anchor_n: u32,
}

/// Solve (f0, B) from one frame's detected partials.
/// Returns None when the frame has no partials at all.
pub fn solve(
    partials: &[DetectedPartial],
    f_target: f64,
    midi: u8,
    scale_break_midi: Option<u8>,
) -> Option<SolvedNote> {
    if partials.is_empty() {
        return None;
    }

    let mut f0 = seed_fundamental(partials, f_target);
    let mut anchor_n = None;

    for _ in 0..MAX_ITERATIONS {
        let b = inharmonicity::estimate_inharmonicity(partials, f0, midi, scale_break_midi);
        let Some(anchor) = pick_anchor(partials, midi) else {
            break;
        };
        anchor_n = Some(anchor.n);
        let n = f64::from(anchor.n);
        let f0_next = anchor.frequency / (n * (1.0 + b * n * n).sqrt());
        let delta = (f0_next - f0).abs();
        f0 = f0_next;
        if delta < CONVERGENCE_HZ {
            break;
        }
    }

    let b = inharmonicity::estimate_inharmonicity(partials, f0, midi, scale_break_midi);
    let anchor_n = anchor_n.unwrap_or_else(|| strongest(partials).n);
    Some(SolvedNote { f0, b, anchor_n })
}

/// First f0 guess from the measured partials: a 1/n-weighted mean of f_n / n
/// over the strong low partials, the target frequency as a last resort.
fn seed_fundamental(partials: &[DetectedPartial], f_target: f64) -> f64 {
    let candidates: Vec<&DetectedPartial> = partials
        .iter()
        .filter(|p| p.amplitude_db > SEED_MIN_DB && (1..=8).contains(&p.n))
        .collect();
    match candidates.len() {
        0 => f_target,
        1 => candidates[0].frequency / f64::from(candidates[0].n),
        _ => {
            let mut weighted = 0.0;
            let mut weight_sum = 0.0;
            for p in &candidates {
                let n = f64::from(p.n);
                weighted += (p.frequency / n) * (1.0 / n);
                weight_sum += 1.0 / n;
            }
            weighted / weight_sum
        }
    }
}

/// The register's preferred anchor partial, or the strongest partial in the
/// register's acceptable range when the preferred one is absent or weak.
fn pick_anchor<'a>(partials: &'a [DetectedPartial], midi: u8) -> Option<&'a DetectedPartial> {
    let preferred = physics::anchor_partial(midi);
    if let Some(p) = partials.iter().find(|p| p.n == preferred) {
        if p.amplitude_db >= ANCHOR_MIN_DB {
            return Some(p);
        }
    }
    let range = physics::anchor_fallback_range(midi);
    partials
        .iter()
        .filter(|p| range.contains(&p.n) && p.amplitude_db >= ANCHOR_MIN_DB)
        .max_by(|a, b| a.magnitude.partial_cmp(&b.magnitude).expect("magnitudes are finite"))
}

fn strongest(partials: &[DetectedPartial]) -> &DetectedPartial {
    partials
        .iter()
        .max_by(|a, b| a.magnitude.partial_cmp(&b.magnitude).expect("magnitudes are finite"))
        .expect("caller checked partials is non-empty")
}

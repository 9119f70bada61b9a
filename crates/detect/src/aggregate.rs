//! Confidence fusion: weighted sum of the per-signal breakdown.

use std::collections::BTreeMap;

use leakwatch_core::config::FusionWeights;
use leakwatch_core::SignalKind;

/// Weight assigned to one detector.
pub fn weight_for(kind: SignalKind, weights: &FusionWeights) -> f64 {
    match kind {
        SignalKind::Mnf => weights.mnf,
        SignalKind::Residual => weights.residual,
        SignalKind::Cusum => weights.cusum,
        SignalKind::AfterHours => weights.after_hours,
        SignalKind::Burst => weights.burst,
    }
}

/// Fuse a per-signal breakdown into a single confidence in [0, 100].
///
/// Signals absent from the breakdown contribute zero; the weights are
/// validated to sum to 1.0 at config load, so the result needs no
/// renormalization.
pub fn fuse(breakdown: &BTreeMap<SignalKind, f64>, weights: &FusionWeights) -> f64 {
    let sum: f64 = breakdown
        .iter()
        .map(|(kind, score)| weight_for(*kind, weights) * score)
        .sum();
    sum.clamp(0.0, 100.0)
}

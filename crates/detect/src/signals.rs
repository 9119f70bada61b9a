//! Signal extractors: five independent views of the same reading stream.
//!
//! Each extractor is a pure function of (readings, baseline, config) and
//! returns a score in [0, 100]. Empty or insufficient input scores 0, never
//! an error; a property with no data is quiet, not broken.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

use leakwatch_core::{DetectionConfig, Reading, SignalKind};

use crate::baseline::Baseline;

/// Floor applied to near-zero denominators so a flat baseline still yields
/// finite ratios. L/min.
const ABS_FLOOR_LPM: f64 = 0.1;

/// Night-flow excess that saturates the MNF score, as a multiple of the
/// detection threshold.
const MNF_SATURATION: f64 = 1.0;

/// Mean positive residual that saturates RESIDUAL, as a multiple of the
/// mean expected flow.
const RESIDUAL_SATURATION: f64 = 2.0;

/// After-hours ratio excess that saturates AFTERHRS.
const AFTER_HOURS_SCALE: f64 = 0.5;

/// Burst run strength that saturates BURSTBF.
const BURST_SATURATION: f64 = 5.0;

/// Number of trailing days the MNF extractor inspects.
const MNF_LOOKBACK_DAYS: i64 = 7;

fn clamp_score(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn trailing_day<'a>(readings: &'a [Reading], as_of: DateTime<Utc>) -> impl Iterator<Item = &'a Reading> {
    let from = as_of - Duration::days(1);
    readings
        .iter()
        .filter(move |r| r.timestamp >= from && r.timestamp < as_of && r.flow_rate_lpm.is_finite())
}

/// Minimum night flow over the trailing week against the expected night
/// minimum. The slowest signal and the most specific: sustained flow in the
/// dead of night has few innocent explanations.
pub fn mnf_score(readings: &[Reading], as_of: DateTime<Utc>, baseline: &Baseline, config: &DetectionConfig) -> f64 {
    let from = as_of - Duration::days(MNF_LOOKBACK_DAYS);
    let mut night_min: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for r in readings {
        if r.timestamp < from || r.timestamp >= as_of || !r.flow_rate_lpm.is_finite() {
            continue;
        }
        if config.night_window.contains(r.timestamp.hour()) {
            night_min
                .entry(r.timestamp.date_naive())
                .and_modify(|m| *m = m.min(r.flow_rate_lpm))
                .or_insert(r.flow_rate_lpm);
        }
    }
    if night_min.is_empty() {
        return 0.0;
    }

    // 3*MAD above the expected minimum is normal variation; flow beyond
    // that is excess night flow.
    let threshold = (3.0 * baseline.night_flow_mad_lpm).max(ABS_FLOOR_LPM);
    let subs: Vec<f64> = night_min
        .values()
        .map(|&day_min| {
            let delta = day_min - baseline.expected_night_flow_lpm;
            if delta <= threshold {
                0.0
            } else {
                ((delta - threshold) / (threshold * MNF_SATURATION + ABS_FLOOR_LPM)).min(1.0)
            }
        })
        .collect();

    clamp_score(100.0 * subs.iter().sum::<f64>() / subs.len() as f64)
}

/// Mean positive residual of the trailing day against the per-cell expected
/// flow. Catches broad elevation that never crosses a burst threshold.
pub fn residual_score(readings: &[Reading], as_of: DateTime<Utc>, baseline: &Baseline) -> f64 {
    let mut positive_sum = 0.0;
    let mut count = 0usize;
    for r in trailing_day(readings, as_of) {
        if r.flow_rate_lpm < 0.0 {
            continue;
        }
        if let Some(expected) = baseline.expected(&r.timestamp) {
            let residual = r.flow_rate_lpm - expected.center;
            if residual > 0.0 {
                positive_sum += residual;
            }
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let mean_positive = positive_sum / count as f64;
    let denom = baseline.mean_expected_flow().max(ABS_FLOOR_LPM);
    clamp_score(100.0 * (mean_positive / (RESIDUAL_SATURATION * denom)).min(1.0))
}

/// One-sided CUSUM over standardized residuals across the whole window.
/// Accumulates small persistent shifts that no single day would flag.
pub fn cusum_score(readings: &[Reading], as_of: DateTime<Utc>, baseline: &Baseline, config: &DetectionConfig) -> f64 {
    let k = config.cusum.reference_offset;
    let h = config.cusum.h;
    let mut s = 0.0f64;
    let mut seen = false;
    for r in readings {
        if r.timestamp >= as_of || !r.flow_rate_lpm.is_finite() {
            continue;
        }
        if let Some(expected) = baseline.expected(&r.timestamp) {
            let spread = expected.spread.max(ABS_FLOOR_LPM);
            let z = (r.flow_rate_lpm - expected.center) / spread;
            s = (s + z - k).max(0.0);
            seen = true;
        }
    }
    if !seen || s <= h {
        return 0.0;
    }
    // At the decision boundary the evidence is marginal; score scales with
    // the overshoot and saturates at one full h beyond it.
    clamp_score(100.0 * ((s - h) / h).min(1.0))
}

/// Share of the trailing day's consumption outside operating hours,
/// against the baseline's expected share.
pub fn after_hours_score(readings: &[Reading], as_of: DateTime<Utc>, baseline: &Baseline, config: &DetectionConfig) -> f64 {
    let mut after = 0.0;
    let mut total = 0.0;
    for r in trailing_day(readings, as_of) {
        if r.flow_rate_lpm < 0.0 {
            continue;
        }
        total += r.flow_rate_lpm;
        if !config.operating_hours.contains(r.timestamp.hour()) {
            after += r.flow_rate_lpm;
        }
    }
    if total <= f64::EPSILON {
        return 0.0;
    }
    let excess = after / total - baseline.expected_after_hours_ratio;
    clamp_score(100.0 * (excess.max(0.0) / AFTER_HOURS_SCALE).min(1.0))
}

/// Contiguous runs of flow far above the expected cell mean in the trailing
/// day. The fastest signal: a burst pipe shows up here first.
pub fn burst_score(readings: &[Reading], as_of: DateTime<Utc>, baseline: &Baseline, config: &DetectionConfig) -> f64 {
    let factor = config.burst.threshold_factor;
    let min_run = config.burst.min_run_intervals as usize;

    let mut best = 0.0f64;
    let mut run: Vec<f64> = Vec::new();
    let close_run = |run: &mut Vec<f64>, best: &mut f64| {
        if run.len() >= min_run {
            let mean_ratio = run.iter().sum::<f64>() / run.len() as f64;
            // Magnitude times duration, both relative to the qualifying
            // minimum, so a marginal run scores low on both axes.
            let strength = (mean_ratio / factor) * (run.len() as f64 / min_run as f64);
            *best = best.max(strength);
        }
        run.clear();
    };

    for r in trailing_day(readings, as_of) {
        let expected = match baseline.expected(&r.timestamp) {
            Some(e) => e.center.max(ABS_FLOOR_LPM),
            None => {
                close_run(&mut run, &mut best);
                continue;
            }
        };
        let ratio = r.flow_rate_lpm / expected;
        if ratio >= factor {
            run.push(ratio);
        } else {
            close_run(&mut run, &mut best);
        }
    }
    close_run(&mut run, &mut best);

    if best <= 0.0 {
        return 0.0;
    }
    clamp_score(100.0 * (best / BURST_SATURATION).min(1.0))
}

/// Run all five extractors and assemble the per-signal breakdown.
///
/// A low-confidence baseline attenuates every signal by the configured
/// factor; the breakdown reports the attenuated values so the fused
/// confidence and the breakdown stay consistent.
pub fn score_signals(
    readings: &[Reading],
    as_of: DateTime<Utc>,
    baseline: &Baseline,
    config: &DetectionConfig,
) -> BTreeMap<SignalKind, f64> {
    let mut breakdown = BTreeMap::new();
    breakdown.insert(SignalKind::Mnf, mnf_score(readings, as_of, baseline, config));
    breakdown.insert(SignalKind::Residual, residual_score(readings, as_of, baseline));
    breakdown.insert(SignalKind::Cusum, cusum_score(readings, as_of, baseline, config));
    breakdown.insert(
        SignalKind::AfterHours,
        after_hours_score(readings, as_of, baseline, config),
    );
    breakdown.insert(SignalKind::Burst, burst_score(readings, as_of, baseline, config));

    if baseline.low_confidence {
        for score in breakdown.values_mut() {
            *score = clamp_score(*score * config.low_confidence_factor);
        }
    }
    breakdown
}

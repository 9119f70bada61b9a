//! Baseline estimator: expected-consumption profile per property.
//!
//! Readings are grouped into (day-of-week, quarter-hour slot) cells over a
//! trailing window. Cells with too few distinct weeks of data fall back to
//! the time-of-day aggregate across all weekdays, and a baseline built from
//! fewer days than the configured minimum is flagged low-confidence.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use leakwatch_core::{DetectionConfig, PropertyId, Reading, SLOTS_PER_DAY};

use crate::stats;

const CELLS: usize = 7 * SLOTS_PER_DAY;

/// Robust location/scale of flow for one baseline cell.
///
/// `center` is the lower median of the samples and `spread` a scaled MAD
/// around it. Leaks only push flow up, so a low-biased location keeps a
/// cell honest even when a leak in progress occupies half its samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub center: f64,
    pub spread: f64,
    pub samples: u32,
}

/// Expected-consumption profile for one property over one trailing window.
///
/// Owned by the estimator, consumed read-only by the signal extractors.
/// Superseded baselines are discarded, not retained.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub property_id: PropertyId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Resolved per-(weekday, slot) stats; fallback already applied.
    cells: Vec<Option<BucketStats>>,
    /// How many resolved cells came from the time-of-day fallback.
    pub fallback_cells: usize,
    /// True when the window held fewer distinct days than required.
    pub low_confidence: bool,
    /// Robust (median) expected minimum night flow, L/min.
    pub expected_night_flow_lpm: f64,
    /// MAD of the per-night minimum flows, L/min.
    pub night_flow_mad_lpm: f64,
    /// Expected share of daily consumption outside operating hours.
    pub expected_after_hours_ratio: f64,
    /// Distinct days with at least one reading in the window.
    pub days_observed: usize,
}

fn slot_of(ts: &DateTime<Utc>) -> usize {
    (ts.hour() as usize) * 4 + (ts.minute() as usize) / 15
}

fn cell_of(ts: &DateTime<Utc>) -> usize {
    ts.weekday().num_days_from_monday() as usize * SLOTS_PER_DAY + slot_of(ts)
}

impl Baseline {
    /// Expected flow stats for a timestamp's (weekday, slot) cell, if the
    /// window held any usable data for it.
    pub fn expected(&self, ts: &DateTime<Utc>) -> Option<&BucketStats> {
        self.cells[cell_of(ts)].as_ref()
    }

    /// Mean expected flow across all resolved cells. Used as a
    /// normalization denominator by the extractors.
    pub fn mean_expected_flow(&self) -> f64 {
        let resolved: Vec<f64> = self.cells.iter().flatten().map(|s| s.center).collect();
        stats::mean(&resolved)
    }
}

/// Stateless estimator; see [`Baseline`].
pub struct BaselineEstimator;

impl BaselineEstimator {
    /// Estimate a baseline from the trailing window ending at `as_of`.
    ///
    /// Never fails: insufficient data degrades to a low-confidence baseline
    /// with empty cells rather than an error. Malformed samples (negative
    /// or non-finite flow) are skipped. Missing intervals are excluded, not
    /// treated as zero flow. Deterministic: identical readings produce an
    /// identical baseline.
    pub fn estimate(
        property_id: &PropertyId,
        readings: &[Reading],
        as_of: DateTime<Utc>,
        config: &DetectionConfig,
    ) -> Baseline {
        let window_start = as_of - Duration::days(config.baseline_window_days as i64);

        let mut per_cell: Vec<Vec<f64>> = vec![Vec::new(); CELLS];
        let mut per_slot: Vec<Vec<f64>> = vec![Vec::new(); SLOTS_PER_DAY];
        let mut skipped = 0usize;

        // Per-day aggregates for night flow and after-hours ratio.
        let mut night_min: std::collections::BTreeMap<NaiveDate, f64> = Default::default();
        let mut day_totals: std::collections::BTreeMap<NaiveDate, (f64, f64)> = Default::default();

        for r in readings {
            if r.timestamp < window_start || r.timestamp >= as_of {
                continue;
            }
            if !r.flow_rate_lpm.is_finite() || r.flow_rate_lpm < 0.0 {
                skipped += 1;
                continue;
            }
            per_cell[cell_of(&r.timestamp)].push(r.flow_rate_lpm);
            per_slot[slot_of(&r.timestamp)].push(r.flow_rate_lpm);

            let date = r.timestamp.date_naive();
            let hour = r.timestamp.hour();

            if config.night_window.contains(hour) {
                night_min
                    .entry(date)
                    .and_modify(|m| *m = m.min(r.flow_rate_lpm))
                    .or_insert(r.flow_rate_lpm);
            }

            let totals = day_totals.entry(date).or_insert((0.0, 0.0));
            totals.1 += r.flow_rate_lpm;
            if !config.operating_hours.contains(hour) {
                totals.0 += r.flow_rate_lpm;
            }
        }

        if skipped > 0 {
            debug!(property = %property_id, skipped, "skipped malformed readings");
        }

        let slot_stats: Vec<Option<BucketStats>> = per_slot
            .iter()
            .map(|values| to_stats(values))
            .collect();

        let mut fallback_cells = 0usize;
        let cells: Vec<Option<BucketStats>> = (0..CELLS)
            .map(|i| {
                let values = &per_cell[i];
                if values.len() >= config.min_cell_weeks as usize {
                    to_stats(values)
                } else {
                    let fallback = slot_stats[i % SLOTS_PER_DAY];
                    if fallback.is_some() {
                        fallback_cells += 1;
                    }
                    fallback
                }
            })
            .collect();

        let night_minima: Vec<f64> = night_min.values().copied().collect();
        let ratios: Vec<f64> = day_totals
            .values()
            .filter(|(_, total)| *total > f64::EPSILON)
            .map(|(after, total)| after / total)
            .collect();

        let days_observed = day_totals.len();
        let low_confidence = days_observed < (config.min_cell_weeks as usize) * 7;

        if low_confidence {
            debug!(
                property = %property_id,
                days_observed,
                "baseline flagged low-confidence"
            );
        }

        Baseline {
            property_id: property_id.clone(),
            window_start,
            window_end: as_of,
            cells,
            fallback_cells,
            low_confidence,
            expected_night_flow_lpm: stats::median(&night_minima),
            night_flow_mad_lpm: stats::mad(&night_minima),
            expected_after_hours_ratio: stats::median(&ratios),
            days_observed,
        }
    }
}

// Consistent with a normal distribution's stddev.
const MAD_SCALE: f64 = 1.4826;

/// Lower median: for even counts, the smaller of the two middle values.
fn lower_median(sorted: &[f64]) -> f64 {
    sorted[(sorted.len() - 1) / 2]
}

fn to_stats(values: &[f64]) -> Option<BucketStats> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let center = lower_median(&sorted);
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(|a, b| a.total_cmp(b));
    Some(BucketStats {
        center,
        spread: MAD_SCALE * lower_median(&deviations),
        samples: values.len() as u32,
    })
}

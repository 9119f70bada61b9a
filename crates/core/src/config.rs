//! Detection configuration: fusion weights, thresholds, CUSUM parameters.
//!
//! Loaded from a YAML document and validated up front: a config that fails
//! `validate()` never reaches scoring time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LeakError;

/// Top-level detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// Confidence at or above which the incident collaborator opens an incident.
    pub alert_threshold: f64,
    /// Weights for the five-signal fusion (must sum to 1.0).
    pub fusion_weights: FusionWeights,
    /// Trailing window for baseline estimation, in days.
    pub baseline_window_days: u32,
    /// Minimum distinct weeks of samples per (weekday, slot) cell before the
    /// estimator falls back to the time-of-day aggregate.
    pub min_cell_weeks: u32,
    /// Multiplier applied to extractor scores when the baseline is
    /// low-confidence.
    pub low_confidence_factor: f64,
    /// One-sided CUSUM control-chart parameters.
    pub cusum: CusumParams,
    /// Overnight window used by the minimum-night-flow detector.
    pub night_window: HourWindow,
    /// Declared operating hours; consumption outside them is "after hours".
    pub operating_hours: HourWindow,
    /// Discount applied when an observation matches a learned false-alarm
    /// pattern.
    pub pattern_discount: DiscountRange,
    /// Mean absolute bin difference below which two consumption-profile
    /// shapes count as a match.
    pub profile_tolerance: f64,
    /// Sustained-burst detector parameters.
    pub burst: BurstParams,
    /// Ascending boundaries between severity bands S1..S5, in L/h of
    /// night-flow delta.
    pub severity_bands_lph: [f64; 4],
    /// Select the deterministic synthetic engine instead of the real
    /// pipeline (demo installations without meter data).
    pub demo_mode: bool,
}

/// Fusion weights for the five detectors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FusionWeights {
    pub mnf: f64,
    pub residual: f64,
    pub cusum: f64,
    pub after_hours: f64,
    pub burst: f64,
}

impl FusionWeights {
    pub fn sum(&self) -> f64 {
        self.mnf + self.residual + self.cusum + self.after_hours + self.burst
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            mnf: 0.4,
            residual: 0.2,
            cusum: 0.2,
            after_hours: 0.1,
            burst: 0.1,
        }
    }
}

/// One-sided CUSUM parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CusumParams {
    /// Decision threshold the running sum must exceed to alarm.
    pub h: f64,
    /// Reference offset subtracted from each normalized residual (the "k"
    /// of the classical chart); absorbs small drifts.
    pub reference_offset: f64,
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            h: 5.0,
            reference_offset: 0.5,
        }
    }
}

/// A half-open window of whole hours within a day, `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            // Wraps midnight, e.g. 22:00-05:00.
            hour >= self.start || hour < self.end
        }
    }
}

/// Pattern-match discount bounds, as fractions of confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DiscountRange {
    pub min: f64,
    pub max: f64,
    /// Occurrence count at which the discount reaches `max`.
    pub occurrence_cap: u32,
}

impl Default for DiscountRange {
    fn default() -> Self {
        Self {
            min: 0.20,
            max: 0.30,
            occurrence_cap: 5,
        }
    }
}

/// Sustained-burst detector parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BurstParams {
    /// Flow must exceed `threshold_factor` x expected to count toward a run.
    pub threshold_factor: f64,
    /// Minimum contiguous 15-minute intervals for a run to score.
    pub min_run_intervals: u32,
}

impl Default for BurstParams {
    fn default() -> Self {
        Self {
            threshold_factor: 3.0,
            min_run_intervals: 4,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 70.0,
            fusion_weights: FusionWeights::default(),
            baseline_window_days: 28,
            min_cell_weeks: 2,
            low_confidence_factor: 0.7,
            cusum: CusumParams::default(),
            night_window: HourWindow { start: 1, end: 4 },
            operating_hours: HourWindow { start: 7, end: 18 },
            pattern_discount: DiscountRange::default(),
            profile_tolerance: 0.25,
            burst: BurstParams::default(),
            severity_bands_lph: [200.0, 1000.0, 3000.0, 10000.0],
            demo_mode: false,
        }
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

impl DetectionConfig {
    /// Parse a YAML document and validate it. Fails fast on any invalid
    /// parameter, so scoring never sees a bad config.
    pub fn from_yaml(yaml: &str) -> Result<Self, LeakError> {
        let config: DetectionConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LeakError::ConfigurationInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, LeakError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), LeakError> {
        let invalid = |msg: String| Err(LeakError::ConfigurationInvalid(msg));

        if !(0.0..=100.0).contains(&self.alert_threshold) {
            return invalid(format!(
                "alert_threshold {} outside [0, 100]",
                self.alert_threshold
            ));
        }

        let w = &self.fusion_weights;
        for (name, value) in [
            ("mnf", w.mnf),
            ("residual", w.residual),
            ("cusum", w.cusum),
            ("after_hours", w.after_hours),
            ("burst", w.burst),
        ] {
            if value < 0.0 {
                return invalid(format!("fusion weight {name} is negative"));
            }
        }
        if (w.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return invalid(format!("fusion weights sum to {}, expected 1.0", w.sum()));
        }

        if self.baseline_window_days < 7 {
            return invalid(format!(
                "baseline_window_days {} below minimum of 7",
                self.baseline_window_days
            ));
        }
        if self.min_cell_weeks == 0 {
            return invalid("min_cell_weeks must be at least 1".to_owned());
        }
        if !(0.0..=1.0).contains(&self.low_confidence_factor)
            || self.low_confidence_factor == 0.0
        {
            return invalid(format!(
                "low_confidence_factor {} outside (0, 1]",
                self.low_confidence_factor
            ));
        }
        if self.cusum.h <= 0.0 {
            return invalid(format!("cusum.h {} must be positive", self.cusum.h));
        }
        if self.cusum.reference_offset < 0.0 {
            return invalid("cusum.reference_offset must be non-negative".to_owned());
        }
        for (name, window) in [
            ("night_window", self.night_window),
            ("operating_hours", self.operating_hours),
        ] {
            if window.start > 23 || window.end > 24 {
                return invalid(format!("{name} hours outside 0..=23"));
            }
        }

        let d = &self.pattern_discount;
        if d.min < 0.0 || d.max >= 1.0 || d.min > d.max {
            return invalid(format!(
                "pattern_discount [{}, {}] must satisfy 0 <= min <= max < 1",
                d.min, d.max
            ));
        }
        if d.occurrence_cap == 0 {
            return invalid("pattern_discount.occurrence_cap must be at least 1".to_owned());
        }

        if !(0.0..1.0).contains(&self.profile_tolerance) {
            return invalid(format!(
                "profile_tolerance {} outside [0, 1)",
                self.profile_tolerance
            ));
        }
        if self.burst.threshold_factor <= 1.0 {
            return invalid(format!(
                "burst.threshold_factor {} must exceed 1.0",
                self.burst.threshold_factor
            ));
        }
        if self.burst.min_run_intervals == 0 {
            return invalid("burst.min_run_intervals must be at least 1".to_owned());
        }

        let bands = &self.severity_bands_lph;
        if !bands.windows(2).all(|p| p[0] < p[1]) || bands[0] <= 0.0 {
            return invalid("severity_bands_lph must be positive and ascending".to_owned());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        DetectionConfig::default().validate().unwrap();
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = FusionWeights::default();
        assert!((w.sum() - 1.0).abs() < 1e-12);
        assert_eq!(w.mnf, 0.4);
    }

    #[test]
    fn parse_bundled_config() {
        let yaml = include_str!("../../../data/config/detection.yml");
        let config = DetectionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.alert_threshold, 70.0);
        assert_eq!(config.baseline_window_days, 28);
        assert!(!config.demo_mode);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = DetectionConfig::from_yaml("alert_threshold: 80\n").unwrap();
        assert_eq!(config.alert_threshold, 80.0);
        assert_eq!(config.fusion_weights, FusionWeights::default());
    }

    #[test]
    fn bad_weight_sum_fails_fast() {
        let yaml = r#"
fusion_weights:
  mnf: 0.5
  residual: 0.2
  cusum: 0.2
  after_hours: 0.1
  burst: 0.1
"#;
        let err = DetectionConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LeakError::ConfigurationInvalid(_)));
    }

    #[test]
    fn threshold_out_of_range_fails() {
        let err = DetectionConfig::from_yaml("alert_threshold: 120\n").unwrap_err();
        assert!(matches!(err, LeakError::ConfigurationInvalid(_)));
    }

    #[test]
    fn discount_range_ordering_enforced() {
        let yaml = r#"
pattern_discount:
  min: 0.4
  max: 0.3
  occurrence_cap: 5
"#;
        assert!(DetectionConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn hour_window_wrapping() {
        let window = HourWindow { start: 22, end: 5 };
        assert!(window.contains(23));
        assert!(window.contains(2));
        assert!(!window.contains(12));

        let night = HourWindow { start: 1, end: 4 };
        assert!(night.contains(1));
        assert!(!night.contains(4));
    }
}

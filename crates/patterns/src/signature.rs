//! False-alarm signatures: compact feature keys summarizing the
//! circumstances of an incident (who, when, what shape of consumption).

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use leakwatch_core::Reading;

/// Number of coarse bins a day's consumption profile is quantized into.
pub const PROFILE_BINS: usize = 8;

/// Hours covered by one profile bin / time bucket.
const HOURS_PER_BUCKET: u32 = 3;

/// Meteorological season, southern hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Summer,
    Autumn,
    Winter,
    Spring,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Summer,
            3..=5 => Season::Autumn,
            6..=8 => Season::Winter,
            _ => Season::Spring,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Winter => "winter",
            Season::Spring => "spring",
        }
    }
}

/// A day's consumption profile quantized to `PROFILE_BINS` normalized bins.
///
/// Bins sum to 1.0 unless the day had zero total flow. Two shapes match when
/// their mean absolute bin difference is within the configured tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileShape {
    pub bins: [f64; PROFILE_BINS],
}

impl ProfileShape {
    /// Build a shape from one day of readings. Missing intervals simply
    /// contribute nothing to their bin.
    pub fn from_readings(readings: &[Reading]) -> Self {
        let mut bins = [0.0f64; PROFILE_BINS];
        for r in readings {
            if !r.flow_rate_lpm.is_finite() || r.flow_rate_lpm < 0.0 {
                continue;
            }
            let bucket = (r.timestamp.hour() / HOURS_PER_BUCKET) as usize;
            bins[bucket.min(PROFILE_BINS - 1)] += r.flow_rate_lpm;
        }
        let total: f64 = bins.iter().sum();
        if total > f64::EPSILON {
            for b in &mut bins {
                *b /= total;
            }
        }
        Self { bins }
    }

    /// Mean absolute bin difference within `tolerance` counts as a match.
    pub fn similar(&self, other: &ProfileShape, tolerance: f64) -> bool {
        let diff: f64 = self
            .bins
            .iter()
            .zip(other.bins.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / PROFILE_BINS as f64;
        diff <= tolerance
    }

    /// Stable textual form with bins quantized to percent, for store keys.
    fn quantized(&self) -> String {
        self.bins
            .iter()
            .map(|b| format!("{:02}", (b * 100.0).round() as u32))
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Composite key over the circumstances of an incident. Exact on the
/// categorical fields; the shape participates via near-matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignature {
    /// Coarse property classification (e.g. "school", "office").
    pub property_class: String,
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    /// 3-hour slot of the day, 0..8.
    pub time_bucket: u8,
    pub season: Season,
    pub shape: ProfileShape,
}

impl PatternSignature {
    /// Derive a signature from an observation's circumstances and the day's
    /// readings.
    pub fn derive(
        property_class: &str,
        timestamp: DateTime<Utc>,
        day_readings: &[Reading],
    ) -> Self {
        Self {
            property_class: property_class.to_owned(),
            weekday: timestamp.weekday().num_days_from_monday() as u8,
            time_bucket: (timestamp.hour() / HOURS_PER_BUCKET) as u8,
            season: Season::from_month(timestamp.month()),
            shape: ProfileShape::from_readings(day_readings),
        }
    }

    /// Whether the categorical fields match exactly.
    pub fn same_context(&self, other: &PatternSignature) -> bool {
        self.property_class == other.property_class
            && self.weekday == other.weekday
            && self.time_bucket == other.time_bucket
            && self.season == other.season
    }

    /// Near-match rule: exact context plus shape within tolerance.
    pub fn matches(&self, other: &PatternSignature, tolerance: f64) -> bool {
        self.same_context(other) && self.shape.similar(&other.shape, tolerance)
    }

    /// Stable store key. Shape is included in quantized form so repeated
    /// occurrences of the same circumstances merge instead of duplicating.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.property_class,
            self.weekday,
            self.time_bucket,
            self.season.as_str(),
            self.shape.quantized()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leakwatch_core::PropertyId;

    fn reading(hour: u32, flow: f64) -> Reading {
        Reading {
            property_id: PropertyId::from("p1"),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap(),
            flow_rate_lpm: flow,
        }
    }

    #[test]
    fn seasons_southern_hemisphere() {
        assert_eq!(Season::from_month(1), Season::Summer);
        assert_eq!(Season::from_month(4), Season::Autumn);
        assert_eq!(Season::from_month(7), Season::Winter);
        assert_eq!(Season::from_month(10), Season::Spring);
        assert_eq!(Season::from_month(12), Season::Summer);
    }

    #[test]
    fn shape_normalizes_to_unit_sum() {
        let readings: Vec<Reading> = (0..24).map(|h| reading(h, 2.0)).collect();
        let shape = ProfileShape::from_readings(&readings);
        let total: f64 = shape.bins.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Uniform flow -> uniform bins.
        for b in shape.bins {
            assert!((b - 1.0 / PROFILE_BINS as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn shape_of_empty_day_is_zero() {
        let shape = ProfileShape::from_readings(&[]);
        assert!(shape.bins.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn similar_shapes_match_within_tolerance() {
        let a = ProfileShape {
            bins: [0.2, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.2],
        };
        let mut b = a;
        b.bins[0] = 0.25;
        b.bins[7] = 0.15;
        assert!(a.similar(&b, 0.05));
        assert!(!a.similar(&b, 0.005));
    }

    #[test]
    fn signature_derivation() {
        let readings: Vec<Reading> = (0..24).map(|h| reading(h, 1.0)).collect();
        // 2024-03-04 is a Monday in autumn.
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 2, 30, 0).unwrap();
        let sig = PatternSignature::derive("school", ts, &readings);
        assert_eq!(sig.weekday, 0);
        assert_eq!(sig.time_bucket, 0);
        assert_eq!(sig.season, Season::Autumn);
    }

    #[test]
    fn key_is_stable_for_equal_signatures() {
        let readings: Vec<Reading> = (0..24).map(|h| reading(h, 1.0)).collect();
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 2, 0, 0).unwrap();
        let a = PatternSignature::derive("school", ts, &readings);
        let b = PatternSignature::derive("school", ts, &readings);
        assert_eq!(a.key(), b.key());
    }
}

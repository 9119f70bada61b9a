//! Shared detection-core types: readings, signal scores, observations.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LeakError;

/// Expected spacing between consecutive meter readings.
pub const READING_INTERVAL_MINUTES: i64 = 15;

/// Number of quarter-hour slots in a day.
pub const SLOTS_PER_DAY: usize = 96;

/// Identifier of a metered property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A single flow-meter sample. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub property_id: PropertyId,
    pub timestamp: DateTime<Utc>,
    /// Flow rate in litres per minute. Negative values are malformed.
    pub flow_rate_lpm: f64,
}

impl Reading {
    /// A usable measurement has a finite, non-negative flow rate. Callers
    /// skip the offending sample and continue.
    pub fn validate(&self) -> Result<(), LeakError> {
        if !self.flow_rate_lpm.is_finite() || self.flow_rate_lpm < 0.0 {
            return Err(LeakError::MalformedReading {
                property_id: self.property_id.clone(),
                timestamp: self.timestamp,
                reason: format!("flow rate {} is not a measurement", self.flow_rate_lpm),
            });
        }
        Ok(())
    }
}

/// The five independent leak detectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Mnf,
    Residual,
    Cusum,
    AfterHours,
    Burst,
}

impl SignalKind {
    /// All detectors, in canonical order.
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Mnf,
        SignalKind::Residual,
        SignalKind::Cusum,
        SignalKind::AfterHours,
        SignalKind::Burst,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Mnf => "mnf",
            SignalKind::Residual => "residual",
            SignalKind::Cusum => "cusum",
            SignalKind::AfterHours => "after_hours",
            SignalKind::Burst => "burst",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector's output for a scoring pass. Never persisted standalone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalScore {
    pub kind: SignalKind,
    pub value: f64,
}

impl SignalScore {
    /// Build a score, clamping the value into [0, 100].
    pub fn new(kind: SignalKind, value: f64) -> Self {
        Self {
            kind,
            value: value.clamp(0.0, 100.0),
        }
    }
}

/// The unit handed to the incident collaborator. Immutable once emitted.
///
/// `breakdown` is a BTreeMap so iteration and serialization order are
/// deterministic, which the replay contract requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub property_id: PropertyId,
    pub timestamp: DateTime<Utc>,
    /// Fused leak-likelihood score in [0, 100].
    pub confidence: f64,
    pub breakdown: BTreeMap<SignalKind, f64>,
    /// True when a learned false-alarm pattern discounted the confidence.
    pub pattern_adjusted: bool,
}

impl Observation {
    /// Whether this observation crosses the incident-opening threshold.
    pub fn exceeds(&self, alert_threshold: f64) -> bool {
        self.confidence >= alert_threshold
    }
}

/// Terminal resolution reported back by the incident collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResolutionKind {
    /// Incident closed as resolved; `action_taken` records whether any
    /// remedial work happened.
    Resolved { action_taken: bool },
    /// Incident dismissed without investigation.
    Ignored,
}

impl ResolutionKind {
    /// Resolutions that feed the false-alarm pattern learner.
    pub fn is_false_alarm(&self) -> bool {
        matches!(
            self,
            ResolutionKind::Resolved { action_taken: false } | ResolutionKind::Ignored
        )
    }
}

/// Severity band derived from the night-flow delta in litres per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl Severity {
    /// Map a night-flow delta (L/h) onto a band given the four ascending
    /// boundaries between S1..S5.
    pub fn from_night_flow_delta(delta_lph: f64, bands: &[f64; 4]) -> Self {
        if delta_lph < bands[0] {
            Severity::S1
        } else if delta_lph < bands[1] {
            Severity::S2
        } else if delta_lph < bands[2] {
            Severity::S3
        } else if delta_lph < bands[3] {
            Severity::S4
        } else {
            Severity::S5
        }
    }
}

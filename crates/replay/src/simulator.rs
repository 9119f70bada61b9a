//! Deterministic replay over historical readings.
//!
//! The simulator walks day boundaries in chronological order and runs the
//! same scoring pass the live system would have run, so an incident review
//! can reproduce exactly what the detector saw. Identical input, config,
//! and pattern-store state must yield bit-identical observations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use leakwatch_core::{
    DetectionConfig, LeakError, Observation, PropertyId, Reading, ResolutionKind,
};
use leakwatch_detect::{LeakEngine, MemoryReadingProvider, ScoringEngine};
use leakwatch_patterns::{PatternMatcher, PatternStore};

/// Cooperative cancellation handle. Clone it, hand a copy to whoever may
/// abort the run; the simulator checks it at each day boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Day-by-day replay of one property's history.
///
/// Iterates `Result<Observation, _>` from `start` to `end` inclusive, one
/// evaluation per day boundary. [`ReplaySimulator::restart`] rewinds the
/// cursor without touching the pattern store, so a second pass sees
/// whatever was learned during the first.
#[derive(Debug)]
pub struct ReplaySimulator<S> {
    engine: LeakEngine<MemoryReadingProvider, S>,
    property: PropertyId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cursor: DateTime<Utc>,
    cancel: CancelToken,
}

impl<S: PatternStore> ReplaySimulator<S> {
    /// Build a simulator over a chronological reading feed.
    ///
    /// The feed must be sorted ascending by timestamp; the first regression
    /// fails construction rather than silently reordering history.
    pub fn new(
        readings: Vec<Reading>,
        property: PropertyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        config: DetectionConfig,
        matcher: PatternMatcher<S>,
    ) -> Result<Self, LeakError> {
        if start > end {
            return Err(LeakError::ConfigurationInvalid(format!(
                "replay start {start} is after end {end}"
            )));
        }
        let mut last: Option<DateTime<Utc>> = None;
        for r in &readings {
            if let Some(prev) = last {
                if r.timestamp < prev {
                    return Err(LeakError::ReplayOutOfOrder {
                        property_id: r.property_id.clone(),
                        timestamp: r.timestamp,
                    });
                }
            }
            last = Some(r.timestamp);
        }

        let mut provider = MemoryReadingProvider::new();
        provider.ingest(readings);
        let engine = LeakEngine::new(provider, matcher, config)?;
        info!(property = %property, %start, %end, "replay prepared");
        Ok(Self {
            engine,
            property,
            start,
            end,
            cursor: start,
            cancel: CancelToken::new(),
        })
    }

    /// Token that aborts the run at the next day boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Rewind the cursor to the start date. Learned patterns survive; the
    /// second pass replays against the store as it now stands.
    pub fn restart(&mut self) {
        debug!(property = %self.property, "replay restarted");
        self.cursor = self.start;
    }

    /// Feed an operator resolution into the pattern learner mid-replay,
    /// dated at the current cursor.
    pub fn record_resolution(
        &self,
        resolution: ResolutionKind,
    ) -> Result<Option<u32>, LeakError> {
        self.engine
            .record_resolution(&self.property, self.cursor, resolution)
    }

    pub fn engine(&self) -> &LeakEngine<MemoryReadingProvider, S> {
        &self.engine
    }
}

impl<S: PatternStore> Iterator for ReplaySimulator<S> {
    type Item = Result<Observation, LeakError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor > self.end {
            return None;
        }
        if self.cancel.is_cancelled() {
            info!(property = %self.property, at = %self.cursor, "replay cancelled");
            return None;
        }
        let result = self.engine.score(&self.property, self.cursor);
        self.cursor += Duration::days(1);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    use leakwatch_core::config::DiscountRange;
    use leakwatch_patterns::MemoryPatternStore;

    fn property() -> PropertyId {
        PropertyId::from("p1")
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()
    }

    fn feed(days_before: i64, days_after: i64) -> Vec<Reading> {
        let mut out = Vec::new();
        let mut ts = start() - Duration::days(days_before);
        let end = start() + Duration::days(days_after);
        while ts < end {
            out.push(Reading {
                property_id: property(),
                timestamp: ts,
                flow_rate_lpm: if ts.hour() < 6 { 0.05 } else { 2.0 },
            });
            ts += Duration::minutes(15);
        }
        out
    }

    fn matcher() -> PatternMatcher<MemoryPatternStore> {
        PatternMatcher::new(MemoryPatternStore::new(), DiscountRange::default(), 0.25)
    }

    fn simulator(days: i64) -> ReplaySimulator<MemoryPatternStore> {
        ReplaySimulator::new(
            feed(28, days),
            property(),
            start(),
            start() + Duration::days(days),
            DetectionConfig::default(),
            matcher(),
        )
        .unwrap()
    }

    #[test]
    fn yields_one_observation_per_day_inclusive() {
        let sim = simulator(6);
        let observations: Vec<_> = sim.map(|r| r.unwrap()).collect();
        assert_eq!(observations.len(), 7);
        assert_eq!(observations[0].timestamp, start());
        assert_eq!(observations[6].timestamp, start() + Duration::days(6));
    }

    #[test]
    fn out_of_order_feed_fails_construction() {
        let mut readings = feed(28, 3);
        readings.swap(10, 500);
        let err = ReplaySimulator::new(
            readings,
            property(),
            start(),
            start() + Duration::days(3),
            DetectionConfig::default(),
            matcher(),
        )
        .unwrap_err();
        assert!(matches!(err, LeakError::ReplayOutOfOrder { .. }));
    }

    #[test]
    fn cancellation_stops_at_the_next_day_boundary() {
        let mut sim = simulator(9);
        let token = sim.cancel_token();
        assert!(sim.next().is_some());
        assert!(sim.next().is_some());
        token.cancel();
        assert!(sim.next().is_none());
        assert!(token.is_cancelled());
    }

    #[test]
    fn restart_rewinds_to_the_start_date() {
        let mut sim = simulator(4);
        let first: Vec<_> = sim.by_ref().map(|r| r.unwrap()).collect();
        assert!(sim.next().is_none());

        sim.restart();
        let second: Vec<_> = sim.map(|r| r.unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn replay_is_bit_identical_across_runs() {
        let a: Vec<String> = simulator(5)
            .map(|r| serde_json::to_string(&r.unwrap()).unwrap())
            .collect();
        let b: Vec<String> = simulator(5)
            .map(|r| serde_json::to_string(&r.unwrap()).unwrap())
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = ReplaySimulator::new(
            feed(28, 0),
            property(),
            start(),
            start() - Duration::days(1),
            DetectionConfig::default(),
            matcher(),
        )
        .unwrap_err();
        assert!(matches!(err, LeakError::ConfigurationInvalid(_)));
    }
}

//! Pattern learner/matcher: records false-alarm signatures and discounts
//! confidence for observations that resemble them.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use leakwatch_core::config::DiscountRange;
use leakwatch_core::{Observation, ResolutionKind};

use crate::signature::PatternSignature;
use crate::store::PatternStore;

/// Learns from resolved/ignored incidents and discounts matching
/// observations. Generic over the store so the core runs unchanged against
/// in-memory, file-backed, or database-backed repositories.
#[derive(Debug)]
pub struct PatternMatcher<S> {
    store: S,
    discount: DiscountRange,
    profile_tolerance: f64,
}

impl<S: PatternStore> PatternMatcher<S> {
    pub fn new(store: S, discount: DiscountRange, profile_tolerance: f64) -> Self {
        Self {
            store,
            discount,
            profile_tolerance,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record an incident's terminal resolution. Only false-alarm outcomes
    /// (resolved without action, or ignored) are learned; real leaks leave
    /// the store untouched. Returns the occurrence count after learning.
    pub fn learn(
        &self,
        signature: &PatternSignature,
        resolution: ResolutionKind,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, leakwatch_core::LeakError> {
        if !resolution.is_false_alarm() {
            debug!(?resolution, "resolution is not a false alarm, nothing to learn");
            return Ok(None);
        }
        let count = self.store.upsert(signature, now)?;
        info!(
            key = %signature.key(),
            occurrences = count,
            "learned false-alarm pattern"
        );
        Ok(Some(count))
    }

    /// Find the discount fraction for a signature, if any stored pattern
    /// near-matches it. Store failures are logged and treated as "no match":
    /// a missed discount is acceptable, a failed scoring pass is not.
    pub fn discount_for(&self, signature: &PatternSignature) -> Option<f64> {
        let patterns = match self.store.all() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "pattern store unavailable, skipping discount");
                return None;
            }
        };

        // Among near-matches, the most-seen pattern drives the discount.
        let best = patterns
            .iter()
            .filter(|p| p.signature.matches(signature, self.profile_tolerance))
            .max_by_key(|p| p.occurrence_count)?;

        Some(self.discount_fraction(best.occurrence_count))
    }

    /// Interpolate min -> max with occurrence count, capped.
    fn discount_fraction(&self, occurrences: u32) -> f64 {
        let d = &self.discount;
        if d.occurrence_cap <= 1 {
            return d.max;
        }
        let capped = occurrences.min(d.occurrence_cap);
        let t = (capped.saturating_sub(1)) as f64 / (d.occurrence_cap - 1) as f64;
        d.min + (d.max - d.min) * t
    }

    /// Apply the pattern discount to an observation, if one matches.
    /// No match returns the observation unchanged.
    pub fn apply(&self, mut observation: Observation, signature: &PatternSignature) -> Observation {
        if let Some(fraction) = self.discount_for(signature) {
            let before = observation.confidence;
            observation.confidence = (before * (1.0 - fraction)).clamp(0.0, 100.0);
            observation.pattern_adjusted = true;
            info!(
                property = %observation.property_id,
                before,
                after = observation.confidence,
                discount = fraction,
                "confidence discounted by learned pattern"
            );
        }
        observation
    }
}

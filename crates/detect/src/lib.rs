//! Leak-detection core: baseline estimation, five signal extractors, and
//! weighted confidence fusion.
//!
//! The pipeline per (property, evaluation instant) is
//! baseline -> extractors -> fusion -> pattern discount, wired together by
//! [`engine::LeakEngine`]. Everything upstream of the engine is pure and
//! deterministic; the pattern store is the only shared mutable state.

pub mod aggregate;
pub mod baseline;
pub mod categorize;
pub mod engine;
pub mod signals;
pub mod stats;

pub use baseline::{Baseline, BaselineEstimator, BucketStats};
pub use categorize::LeakCategory;
pub use engine::{
    scoring_engine, DemoEngine, EpisodeAssessment, LeakEngine, MemoryReadingProvider,
    ReadingProvider, ScoringEngine,
};
